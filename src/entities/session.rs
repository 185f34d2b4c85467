use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{invalid_state_error, Error};
use crate::fare;

// captured once at activation; the fare model for a trip stays fixed even
// if the car's tariff changes server side afterwards
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FareSnapshot {
    pub price_per_minute: f64,
    pub base_price: f64,
}

// each variant carries exactly the data that is legal in that state: no
// started_at without an active trip, no trip id without a car id
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Status {
    Idle,
    Reserved {
        trip_id: Uuid,
        car_id: Uuid,
    },
    Active {
        trip_id: Uuid,
        car_id: Uuid,
        started_at: DateTime<Utc>,
        pricing: Option<FareSnapshot>,
        estimated_cost: Option<f64>,
    },
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Idle => "idle".into(),
            Self::Reserved { .. } => "reserved".into(),
            Self::Active { .. } => "active".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TripSession {
    pub status: Status,
}

impl TripSession {
    pub fn new() -> Self {
        Self {
            status: Status::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.status, Status::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, Status::Active { .. })
    }

    pub fn trip_id(&self) -> Option<Uuid> {
        match &self.status {
            Status::Idle => None,
            Status::Reserved { trip_id, .. } | Status::Active { trip_id, .. } => Some(*trip_id),
        }
    }

    pub fn car_id(&self) -> Option<Uuid> {
        match &self.status {
            Status::Idle => None,
            Status::Reserved { car_id, .. } | Status::Active { car_id, .. } => Some(*car_id),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            Status::Active { started_at, .. } => Some(*started_at),
            _ => None,
        }
    }

    pub fn estimated_cost(&self) -> Option<f64> {
        match &self.status {
            Status::Active { estimated_cost, .. } => *estimated_cost,
            _ => None,
        }
    }

    pub fn has_pricing(&self) -> bool {
        matches!(
            &self.status,
            Status::Active {
                pricing: Some(_),
                ..
            }
        )
    }

    #[tracing::instrument]
    pub fn reserve(&mut self, trip_id: Uuid, car_id: Uuid) -> Result<(), Error> {
        match self.status {
            Status::Idle => {
                self.status = Status::Reserved { trip_id, car_id };
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    #[tracing::instrument]
    pub fn activate(
        &mut self,
        started_at: DateTime<Utc>,
        pricing: Option<FareSnapshot>,
    ) -> Result<(), Error> {
        match self.status {
            Status::Reserved { trip_id, car_id } => {
                let estimated_cost = pricing.as_ref().map(|snapshot| {
                    fare::estimate(
                        snapshot.price_per_minute,
                        snapshot.base_price,
                        started_at,
                        Utc::now(),
                    )
                });

                self.status = Status::Active {
                    trip_id,
                    car_id,
                    started_at,
                    pricing,
                    estimated_cost,
                };

                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    // returns false when there is nothing to recompute, so a recompute loop
    // knows to stop
    pub fn refresh_estimate(&mut self, now: DateTime<Utc>) -> bool {
        match &mut self.status {
            Status::Active {
                started_at,
                pricing: Some(pricing),
                estimated_cost,
                ..
            } => {
                *estimated_cost = Some(fare::estimate(
                    pricing.price_per_minute,
                    pricing.base_price,
                    *started_at,
                    now,
                ));
                true
            }
            _ => false,
        }
    }

    #[tracing::instrument]
    pub fn complete(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Active { .. } => {
                self.status = Status::Idle;
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    #[tracing::instrument]
    pub fn cancel(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Reserved { .. } | Status::Active { .. } => {
                self.status = Status::Idle;
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    pub fn reset(&mut self) {
        self.status = Status::Idle;
    }
}

#[cfg(test)]
fn snapshot() -> FareSnapshot {
    FareSnapshot {
        price_per_minute: 10.0,
        base_price: 50.0,
    }
}

#[test]
fn reserve_activate_complete_round_trip() {
    let mut session = TripSession::new();
    let trip_id = Uuid::new_v4();
    let car_id = Uuid::new_v4();

    session.reserve(trip_id, car_id).unwrap();
    assert_eq!(session.status.name(), "reserved");
    assert_eq!(session.trip_id(), Some(trip_id));
    assert_eq!(session.car_id(), Some(car_id));
    assert_eq!(session.started_at(), None);
    assert_eq!(session.estimated_cost(), None);

    session.activate(Utc::now(), Some(snapshot())).unwrap();
    assert_eq!(session.status.name(), "active");
    assert!(session.started_at().is_some());
    assert_eq!(session.estimated_cost(), Some(60.0));

    session.complete().unwrap();
    assert!(session.is_idle());
    assert_eq!(session.trip_id(), None);
    assert_eq!(session.car_id(), None);
    assert_eq!(session.estimated_cost(), None);
}

#[test]
fn cancel_is_legal_from_reserved_and_active() {
    let mut session = TripSession::new();
    session.reserve(Uuid::new_v4(), Uuid::new_v4()).unwrap();
    session.cancel().unwrap();
    assert!(session.is_idle());

    session.reserve(Uuid::new_v4(), Uuid::new_v4()).unwrap();
    session.activate(Utc::now(), Some(snapshot())).unwrap();
    session.cancel().unwrap();
    assert!(session.is_idle());
    assert_eq!(session.estimated_cost(), None);
}

#[test]
fn transitions_from_the_wrong_state_are_rejected() {
    let mut session = TripSession::new();

    assert_eq!(session.activate(Utc::now(), None).unwrap_err().code, 100);
    assert_eq!(session.complete().unwrap_err().code, 100);
    assert_eq!(session.cancel().unwrap_err().code, 100);

    session.reserve(Uuid::new_v4(), Uuid::new_v4()).unwrap();
    assert_eq!(
        session
            .reserve(Uuid::new_v4(), Uuid::new_v4())
            .unwrap_err()
            .code,
        100
    );
    assert_eq!(session.complete().unwrap_err().code, 100);
}

#[test]
fn refresh_is_a_no_op_outside_an_active_trip() {
    let mut session = TripSession::new();
    assert!(!session.refresh_estimate(Utc::now()));

    session.reserve(Uuid::new_v4(), Uuid::new_v4()).unwrap();
    assert!(!session.refresh_estimate(Utc::now()));
    assert_eq!(session.estimated_cost(), None);
}

#[test]
fn activation_without_pricing_tracks_the_trip_but_not_the_cost() {
    let mut session = TripSession::new();
    session.reserve(Uuid::new_v4(), Uuid::new_v4()).unwrap();
    session.activate(Utc::now(), None).unwrap();

    assert!(session.is_active());
    assert!(!session.has_pricing());
    assert_eq!(session.estimated_cost(), None);
    assert!(!session.refresh_estimate(Utc::now()));
}

#[test]
fn refresh_applies_the_minimum_fare_floor() {
    use chrono::Duration;

    let mut session = TripSession::new();
    session.reserve(Uuid::new_v4(), Uuid::new_v4()).unwrap();

    let started_at = Utc::now();
    session.activate(started_at, Some(snapshot())).unwrap();

    assert!(session.refresh_estimate(started_at + Duration::seconds(12)));
    assert_eq!(session.estimated_cost(), Some(60.0));

    assert!(session.refresh_estimate(started_at + Duration::minutes(3)));
    assert_eq!(session.estimated_cost(), Some(80.0));
}
