use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a trip ends: the payment created by billing and the QR code
/// the caller scans to pay. Once this exists the client-side estimate is
/// no longer shown.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Receipt {
    pub trip_id: Uuid,
    pub payment_id: Uuid,
    pub qr_code_url: String,
}
