use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::FareSnapshot;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Car {
    pub id: Uuid,
    pub model: String,
    pub license_plate: String,
    pub state: String,
    pub tariff_id: Uuid,
    pub base_price: f64,
    pub price_per_minute: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CarData {
    pub car: Car,
    pub price_per_minute: f64,
    pub telematics: Option<Telematics>,
}

impl CarData {
    pub fn fare_snapshot(&self) -> FareSnapshot {
        FareSnapshot {
            price_per_minute: self.price_per_minute,
            base_price: self.car.base_price,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Telematics {
    pub fuel_level: f64,
    pub location: Coordinates,
    pub door_status: String,
    pub speed: f64,
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}
