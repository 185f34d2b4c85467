mod account;
mod car;
mod command;
mod payment;
mod session;
mod trip;

pub use account::{AuthSession, NewUser};
pub use car::{Car, CarData, Coordinates, Telematics};
pub use command::CommandType;
pub use payment::Receipt;
pub use session::Status as SessionStatus;
pub use session::{FareSnapshot, TripSession};
pub use trip::Status as TripStatus;
pub use trip::Trip;
