use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use rand_distr::{Binomial, Distribution, Normal, Uniform};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::{AuthAPI, CarAPI, CommandAPI, DynAPI, TripAPI, API};
use crate::controller::SessionController;
use crate::entities::{
    AuthSession, Car, CarData, CommandType, Coordinates, NewUser, Receipt, Telematics, Trip,
    TripStatus,
};
use crate::error::{rejection_error, Error};

const MODELS: [&str; 4] = ["Silva S1", "Silva S2", "Corsa Metro", "Corsa Metro XL"];

fn sample_binomial(n: u64, p: f64) -> u64 {
    let bin = Binomial::new(n, p).unwrap();
    bin.sample(&mut rand::thread_rng())
}

fn sample_think_time() -> Duration {
    let dist = Normal::new(400.0, 120.0).unwrap();
    let millis: f64 = dist.sample(&mut rand::thread_rng());

    Duration::from_millis(millis.max(50.0) as u64)
}

fn sample_telematics() -> Telematics {
    let mut rng = rand::thread_rng();
    let fuel = Uniform::from(20.0..95.0);
    let offset = Uniform::from(-0.05..0.05);
    let temperature = Normal::new(21.0, 2.0).unwrap();

    Telematics {
        fuel_level: fuel.sample(&mut rng),
        location: Coordinates {
            latitude: 55.75 + offset.sample(&mut rng),
            longitude: 37.62 + offset.sample(&mut rng),
        },
        door_status: "closed".into(),
        speed: 0.0,
        temperature: temperature.sample(&mut rng),
        timestamp: Utc::now(),
    }
}

struct StubState {
    cars: HashMap<Uuid, CarData>,
    trips: HashMap<Uuid, Trip>,
}

/// In-memory rendition of the platform's services, for running the client
/// without a live backend. Rejections match the gateway's, so the controller
/// sees the same failure surface either way.
pub struct StubPlatform {
    state: Mutex<StubState>,
}

impl StubPlatform {
    pub fn new(fleet_size: usize) -> Self {
        let mut rng = rand::thread_rng();
        let base_price = Normal::<f64>::new(250.0, 40.0).unwrap();
        let price_per_minute = Normal::<f64>::new(8.0, 2.0).unwrap();

        let cars = (0..fleet_size)
            .map(|index| {
                let id = Uuid::new_v4();
                let per_minute: f64 = price_per_minute.sample(&mut rng).max(1.0);

                let data = CarData {
                    car: Car {
                        id,
                        model: (*MODELS.choose(&mut rng).unwrap()).into(),
                        license_plate: format!("V{:03}SH", index),
                        state: "available".into(),
                        tariff_id: Uuid::new_v4(),
                        base_price: base_price.sample(&mut rng).max(50.0),
                        price_per_minute: Some(per_minute),
                    },
                    price_per_minute: per_minute,
                    telematics: Some(sample_telematics()),
                };

                (id, data)
            })
            .collect();

        Self {
            state: Mutex::new(StubState {
                cars,
                trips: HashMap::new(),
            }),
        }
    }
}

fn is_open(trip: &Trip) -> bool {
    matches!(trip.status, TripStatus::Reserved | TripStatus::Active)
}

#[async_trait]
impl AuthAPI for StubPlatform {
    async fn register(&self, new_user: NewUser) -> Result<AuthSession, Error> {
        self.authenticate(&new_user.email, &new_user.password).await
    }

    async fn authenticate(&self, _email: &str, _password: &str) -> Result<AuthSession, Error> {
        Ok(AuthSession {
            token: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4(),
        })
    }
}

#[async_trait]
impl CarAPI for StubPlatform {
    async fn list_available_cars(&self) -> Result<Vec<Car>, Error> {
        let state = self.state.lock().await;

        Ok(state
            .cars
            .values()
            .filter(|data| data.car.state == "available")
            .map(|data| data.car.clone())
            .collect())
    }

    async fn find_car_data(&self, car_id: Uuid) -> Result<CarData, Error> {
        let state = self.state.lock().await;

        let mut data = state
            .cars
            .get(&car_id)
            .cloned()
            .ok_or_else(|| rejection_error("Car not found".into()))?;

        data.telematics = Some(sample_telematics());

        Ok(data)
    }
}

#[async_trait]
impl TripAPI for StubPlatform {
    async fn reserve_trip(&self, user_id: Uuid, car_id: Uuid) -> Result<Uuid, Error> {
        let mut state = self.state.lock().await;

        if state
            .trips
            .values()
            .any(|trip| trip.user_id == user_id && is_open(trip))
        {
            return Err(rejection_error("User already has an active trip".into()));
        }

        let car = state
            .cars
            .get_mut(&car_id)
            .ok_or_else(|| rejection_error("Car not found".into()))?;

        if car.car.state != "available" {
            return Err(rejection_error("Car is already in use".into()));
        }
        car.car.state = "in_use".into();

        let trip = Trip {
            id: Uuid::new_v4(),
            user_id,
            car_id,
            status: TripStatus::Reserved,
            started_at: None,
            ended_at: None,
            created_at: Utc::now(),
        };

        let trip_id = trip.id;
        state.trips.insert(trip_id, trip);

        Ok(trip_id)
    }

    async fn activate_trip(&self, trip_id: Uuid) -> Result<(), Error> {
        let mut state = self.state.lock().await;

        let trip = state
            .trips
            .get_mut(&trip_id)
            .ok_or_else(|| rejection_error("Trip not found".into()))?;

        if trip.status != TripStatus::Reserved {
            return Err(rejection_error(format!(
                "Cannot activate trip: invalid status transition from {} to active",
                trip.status.name()
            )));
        }

        trip.status = TripStatus::Active;
        trip.started_at = Some(Utc::now());

        Ok(())
    }

    async fn end_trip(&self, trip_id: Uuid) -> Result<Receipt, Error> {
        let mut state = self.state.lock().await;

        let trip = state
            .trips
            .get_mut(&trip_id)
            .ok_or_else(|| rejection_error("Trip not found".into()))?;

        if trip.status != TripStatus::Active {
            return Err(rejection_error(format!(
                "Cannot end trip: invalid status transition from {} to completed",
                trip.status.name()
            )));
        }

        trip.status = TripStatus::Completed;
        trip.ended_at = Some(Utc::now());
        let car_id = trip.car_id;

        if let Some(car) = state.cars.get_mut(&car_id) {
            car.car.state = "available".into();
        }

        let payment_id = Uuid::new_v4();

        Ok(Receipt {
            trip_id,
            payment_id,
            qr_code_url: format!("https://pay.example/qr/{}", payment_id),
        })
    }

    async fn cancel_trip(&self, trip_id: Uuid) -> Result<(), Error> {
        let mut state = self.state.lock().await;

        let trip = state
            .trips
            .get_mut(&trip_id)
            .ok_or_else(|| rejection_error("Trip not found".into()))?;

        if !is_open(trip) {
            return Err(rejection_error(format!(
                "Cannot cancel trip: invalid status transition from {} to cancelled",
                trip.status.name()
            )));
        }

        trip.status = TripStatus::Cancelled;
        let car_id = trip.car_id;

        if let Some(car) = state.cars.get_mut(&car_id) {
            car.car.state = "available".into();
        }

        Ok(())
    }

    async fn find_active_trip(&self, user_id: Uuid) -> Result<Option<Trip>, Error> {
        let state = self.state.lock().await;

        Ok(state
            .trips
            .values()
            .find(|trip| trip.user_id == user_id && is_open(trip))
            .cloned())
    }
}

#[async_trait]
impl CommandAPI for StubPlatform {
    async fn send_command(&self, car_id: Uuid, _command: CommandType) -> Result<Uuid, Error> {
        let state = self.state.lock().await;

        let occupied = state
            .trips
            .values()
            .any(|trip| trip.car_id == car_id && trip.status == TripStatus::Active);

        if !occupied {
            return Err(rejection_error(
                "Commands are only available during an active trip".into(),
            ));
        }

        Ok(Uuid::new_v4())
    }
}

impl API for StubPlatform {}

// fans trip cycles out over a pool of simulated riders, each driving its own
// controller against the shared platform
pub struct Executor {
    api: DynAPI,
    riders: usize,
    cycles: usize,
}

impl Executor {
    pub fn new(api: DynAPI, riders: usize, cycles: usize) -> Self {
        Self {
            api,
            riders,
            cycles,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) {
        let (tx, rx): (Sender<usize>, Receiver<usize>) = async_channel::unbounded();

        let mut handles = vec![];
        for rider in 0..self.riders {
            let rx = rx.clone();
            let api = self.api.clone();

            handles.push(tokio::spawn(async move {
                while let Ok(cycle) = rx.recv().await {
                    if let Err(err) = run_cycle(api.clone(), rider, cycle).await {
                        tracing::warn!(rider, cycle, code = err.code, message = %err.message, "trip cycle failed");
                    }
                }
            }));
        }
        drop(rx);

        let cycles = self.cycles;
        handles.push(tokio::spawn(async move {
            for cycle in 0..cycles {
                tx.send(cycle).await.unwrap();
            }
        }));

        futures::future::join_all(handles).await;
    }
}

async fn run_cycle(api: DynAPI, rider: usize, cycle: usize) -> Result<(), Error> {
    let account = api
        .authenticate(&format!("rider{}@example.com", rider), "sesame")
        .await?;

    let controller = SessionController::new(api.clone(), account.user_id);
    controller.rehydrate().await?;

    let cars = api.list_available_cars().await?;
    let car = match cars.choose(&mut rand::thread_rng()) {
        Some(car) => car.clone(),
        None => {
            tracing::warn!(rider, cycle, "no cars available, skipping cycle");
            return Ok(());
        }
    };

    controller.reserve(car.id).await?;

    // a rider occasionally walks away from a reservation
    if sample_binomial(1, 0.9) == 0 {
        controller.cancel().await?;
        tracing::info!(rider, cycle, "reservation abandoned");
        return Ok(());
    }

    controller.activate().await?;
    controller.send_command(CommandType::OpenDoor).await?;
    controller.send_command(CommandType::StartEngine).await?;

    tokio::time::sleep(sample_think_time()).await;

    let session = controller.snapshot().await;
    tracing::info!(
        rider,
        cycle,
        model = %car.model,
        estimate = ?session.estimated_cost(),
        "trip in progress"
    );

    controller.send_command(CommandType::StopEngine).await?;

    if sample_binomial(1, 0.85) > 0 {
        let receipt = controller.end().await?;
        tracing::info!(rider, cycle, qr_code_url = %receipt.qr_code_url, "trip ended");
    } else {
        controller.cancel().await?;
        tracing::info!(rider, cycle, "trip cancelled mid-ride");
    }

    Ok(())
}

pub async fn run_local(riders: usize, cycles: usize) {
    let api: DynAPI = Arc::new(StubPlatform::new(riders * 2));

    Executor::new(api, riders, cycles).run().await;
}
