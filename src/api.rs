use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{AuthSession, Car, CarData, CommandType, NewUser, Receipt, Trip};
use crate::error::Error;

#[async_trait]
pub trait AuthAPI {
    async fn register(&self, new_user: NewUser) -> Result<AuthSession, Error>;

    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthSession, Error>;
}

#[async_trait]
pub trait CarAPI {
    async fn list_available_cars(&self) -> Result<Vec<Car>, Error>;

    async fn find_car_data(&self, car_id: Uuid) -> Result<CarData, Error>;
}

#[async_trait]
pub trait TripAPI {
    async fn reserve_trip(&self, user_id: Uuid, car_id: Uuid) -> Result<Uuid, Error>;

    async fn activate_trip(&self, trip_id: Uuid) -> Result<(), Error>;

    async fn end_trip(&self, trip_id: Uuid) -> Result<Receipt, Error>;

    async fn cancel_trip(&self, trip_id: Uuid) -> Result<(), Error>;

    async fn find_active_trip(&self, user_id: Uuid) -> Result<Option<Trip>, Error>;
}

#[async_trait]
pub trait CommandAPI {
    async fn send_command(&self, car_id: Uuid, command: CommandType) -> Result<Uuid, Error>;
}

pub trait API: AuthAPI + CarAPI + TripAPI + CommandAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;
