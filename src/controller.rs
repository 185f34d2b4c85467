use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::DynAPI;
use crate::entities::{CommandType, Receipt, SessionStatus, TripSession, TripStatus};
use crate::error::{
    invalid_state_error, stale_response_error, transition_in_flight_error, Error,
};

pub const RECOMPUTE_INTERVAL: Duration = Duration::from_secs(10);

struct Inner {
    session: TripSession,
    // bumped on every applied mutation; a transition whose network call
    // outlived the epoch it started under must drop its response
    epoch: u64,
    recompute: Option<JoinHandle<()>>,
    subscribers: Vec<async_channel::Sender<TripSession>>,
}

impl Inner {
    fn commit(&mut self) {
        self.epoch += 1;
        self.publish();
    }

    fn publish(&mut self) {
        let snapshot = self.session.clone();
        self.subscribers
            .retain(|tx| tx.try_send(snapshot.clone()).is_ok());
    }

    fn disarm_recompute(&mut self) {
        if let Some(handle) = self.recompute.take() {
            handle.abort();
        }
    }
}

/// Drives the caller's trip through its lifecycle against the platform's
/// services and keeps a live fare estimate while a trip is active.
///
/// Transitions are serialized: while one transition's network call is
/// outstanding every other transition is rejected locally. The session is
/// mutated only here and by the recompute task; callers read clones.
pub struct SessionController {
    api: DynAPI,
    user_id: Uuid,
    inner: Arc<Mutex<Inner>>,
    gate: Mutex<()>,
}

impl SessionController {
    pub fn new(api: DynAPI, user_id: Uuid) -> Self {
        Self {
            api,
            user_id,
            inner: Arc::new(Mutex::new(Inner {
                session: TripSession::new(),
                epoch: 0,
                recompute: None,
                subscribers: Vec::new(),
            })),
            gate: Mutex::new(()),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn snapshot(&self) -> TripSession {
        self.inner.lock().await.session.clone()
    }

    // the receiver is seeded with the current session and then gets a fresh
    // snapshot after every applied mutation and every recompute tick
    pub async fn subscribe(&self) -> async_channel::Receiver<TripSession> {
        let (tx, rx) = async_channel::unbounded();
        let mut inner = self.inner.lock().await;

        let _ = tx.try_send(inner.session.clone());
        inner.subscribers.push(tx);

        rx
    }

    /// Picks up a trip that is already open for this user, typically on
    /// client start. If the car-data fetch for an active trip fails, the trip
    /// is still tracked, just without an estimate.
    #[tracing::instrument(skip(self))]
    pub async fn rehydrate(&self) -> Result<TripSession, Error> {
        let _gate = self
            .gate
            .try_lock()
            .map_err(|_| transition_in_flight_error())?;

        let epoch = {
            let inner = self.inner.lock().await;
            if !inner.session.is_idle() {
                return Err(invalid_state_error());
            }
            inner.epoch
        };

        let maybe_trip = self.api.find_active_trip(self.user_id).await?;

        let trip = match maybe_trip {
            Some(trip) => trip,
            None => return Ok(self.snapshot().await),
        };

        match trip.status {
            TripStatus::Reserved => {
                let mut inner = self.inner.lock().await;
                if inner.epoch != epoch {
                    return Err(stale_response_error());
                }

                inner.session.reserve(trip.id, trip.car_id)?;
                inner.commit();

                Ok(inner.session.clone())
            }
            TripStatus::Active => {
                let pricing = self.fetch_pricing(trip.car_id).await;
                let started_at = trip.started_at.unwrap_or_else(Utc::now);

                let mut inner = self.inner.lock().await;
                if inner.epoch != epoch {
                    return Err(stale_response_error());
                }

                inner.session.reserve(trip.id, trip.car_id)?;
                inner.session.activate(started_at, pricing)?;
                inner.commit();
                self.arm_recompute(&mut inner);

                Ok(inner.session.clone())
            }
            // completed and cancelled records are history, not an open session
            _ => Ok(self.snapshot().await),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, car_id: Uuid) -> Result<TripSession, Error> {
        let _gate = self
            .gate
            .try_lock()
            .map_err(|_| transition_in_flight_error())?;

        let epoch = {
            let inner = self.inner.lock().await;
            if !inner.session.is_idle() {
                return Err(invalid_state_error());
            }
            inner.epoch
        };

        let trip_id = self.api.reserve_trip(self.user_id, car_id).await?;

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            return Err(stale_response_error());
        }

        inner.session.reserve(trip_id, car_id)?;
        inner.commit();

        tracing::info!(%trip_id, %car_id, "trip reserved");

        Ok(inner.session.clone())
    }

    #[tracing::instrument(skip(self))]
    pub async fn activate(&self) -> Result<TripSession, Error> {
        let _gate = self
            .gate
            .try_lock()
            .map_err(|_| transition_in_flight_error())?;

        let (epoch, trip_id, car_id) = {
            let inner = self.inner.lock().await;
            match inner.session.status {
                SessionStatus::Reserved { trip_id, car_id } => (inner.epoch, trip_id, car_id),
                _ => return Err(invalid_state_error()),
            }
        };

        self.api.activate_trip(trip_id).await?;

        let pricing = self.fetch_pricing(car_id).await;

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            return Err(stale_response_error());
        }

        inner.session.activate(Utc::now(), pricing)?;
        inner.commit();
        self.arm_recompute(&mut inner);

        tracing::info!(%trip_id, "trip activated, billing clock running");

        Ok(inner.session.clone())
    }

    #[tracing::instrument(skip(self))]
    pub async fn end(&self) -> Result<Receipt, Error> {
        let _gate = self
            .gate
            .try_lock()
            .map_err(|_| transition_in_flight_error())?;

        let (epoch, trip_id) = {
            let inner = self.inner.lock().await;
            match inner.session.status {
                SessionStatus::Active { trip_id, .. } => (inner.epoch, trip_id),
                _ => return Err(invalid_state_error()),
            }
        };

        let receipt = self.api.end_trip(trip_id).await?;

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            return Err(stale_response_error());
        }

        inner.disarm_recompute();
        inner.session.complete()?;
        inner.commit();

        tracing::info!(%trip_id, payment_id = %receipt.payment_id, "trip ended");

        Ok(receipt)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self) -> Result<TripSession, Error> {
        let _gate = self
            .gate
            .try_lock()
            .map_err(|_| transition_in_flight_error())?;

        let (epoch, trip_id) = {
            let inner = self.inner.lock().await;
            match inner.session.status {
                SessionStatus::Reserved { trip_id, .. }
                | SessionStatus::Active { trip_id, .. } => (inner.epoch, trip_id),
                _ => return Err(invalid_state_error()),
            }
        };

        self.api.cancel_trip(trip_id).await?;

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            return Err(stale_response_error());
        }

        inner.disarm_recompute();
        inner.session.cancel()?;
        inner.commit();

        tracing::info!(%trip_id, "trip cancelled");

        Ok(inner.session.clone())
    }

    // only forwarded while a trip is active; a car id cached from browsing is
    // not enough to talk to a car the caller is not in
    #[tracing::instrument(skip(self))]
    pub async fn send_command(&self, command: CommandType) -> Result<Uuid, Error> {
        let _gate = self
            .gate
            .try_lock()
            .map_err(|_| transition_in_flight_error())?;

        let car_id = {
            let inner = self.inner.lock().await;
            match inner.session.status {
                SessionStatus::Active { car_id, .. } => car_id,
                _ => return Err(invalid_state_error()),
            }
        };

        self.api.send_command(car_id, command).await
    }

    // logout and teardown; does not wait for the transition gate, so any
    // response still in flight becomes stale
    #[tracing::instrument(skip(self))]
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;

        inner.disarm_recompute();
        inner.session.reset();
        inner.commit();
    }

    async fn fetch_pricing(&self, car_id: Uuid) -> Option<crate::entities::FareSnapshot> {
        match self.api.find_car_data(car_id).await {
            Ok(data) => Some(data.fare_snapshot()),
            Err(err) => {
                tracing::warn!(
                    code = err.code,
                    "car data fetch failed, tracking the trip without an estimate"
                );
                None
            }
        }
    }

    fn arm_recompute(&self, inner: &mut Inner) {
        inner.disarm_recompute();

        if !(inner.session.is_active() && inner.session.has_pricing()) {
            return;
        }

        let shared = Arc::clone(&self.inner);

        inner.recompute = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(RECOMPUTE_INTERVAL);

            loop {
                ticks.tick().await;

                let mut inner = shared.lock().await;
                if !inner.session.refresh_estimate(Utc::now()) {
                    break;
                }
                inner.publish();
            }
        }));
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            inner.disarm_recompute();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AuthAPI, CarAPI, CommandAPI, TripAPI, API};
    use crate::entities::{AuthSession, Car, CarData, NewUser, Trip};
    use crate::error::rejection_error;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    fn car_data(car_id: Uuid) -> CarData {
        CarData {
            car: Car {
                id: car_id,
                model: "Silva S1".into(),
                license_plate: "A123BC".into(),
                state: "available".into(),
                tariff_id: Uuid::new_v4(),
                base_price: 50.0,
                price_per_minute: Some(10.0),
            },
            price_per_minute: 10.0,
            telematics: None,
        }
    }

    #[derive(Default)]
    struct TestAPI {
        reserve_calls: AtomicUsize,
        command_calls: AtomicUsize,
        fail_activate: bool,
        fail_end: bool,
        fail_car_data: bool,
        hold_reserve: Option<Arc<Notify>>,
        active_trip: StdMutex<Option<Trip>>,
    }

    #[async_trait]
    impl AuthAPI for TestAPI {
        async fn register(&self, _new_user: NewUser) -> Result<AuthSession, Error> {
            unimplemented!()
        }

        async fn authenticate(&self, _email: &str, _password: &str) -> Result<AuthSession, Error> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl CarAPI for TestAPI {
        async fn list_available_cars(&self) -> Result<Vec<Car>, Error> {
            Ok(vec![])
        }

        async fn find_car_data(&self, car_id: Uuid) -> Result<CarData, Error> {
            if self.fail_car_data {
                return Err(rejection_error("telemetry offline".into()));
            }
            Ok(car_data(car_id))
        }
    }

    #[async_trait]
    impl TripAPI for TestAPI {
        async fn reserve_trip(&self, _user_id: Uuid, _car_id: Uuid) -> Result<Uuid, Error> {
            self.reserve_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold_reserve {
                hold.notified().await;
            }
            Ok(Uuid::new_v4())
        }

        async fn activate_trip(&self, _trip_id: Uuid) -> Result<(), Error> {
            if self.fail_activate {
                return Err(rejection_error("car is unreachable".into()));
            }
            Ok(())
        }

        async fn end_trip(&self, trip_id: Uuid) -> Result<Receipt, Error> {
            if self.fail_end {
                return Err(rejection_error("billing is down".into()));
            }
            Ok(Receipt {
                trip_id,
                payment_id: Uuid::new_v4(),
                qr_code_url: format!("https://pay.example/qr/{}", trip_id),
            })
        }

        async fn cancel_trip(&self, _trip_id: Uuid) -> Result<(), Error> {
            Ok(())
        }

        async fn find_active_trip(&self, _user_id: Uuid) -> Result<Option<Trip>, Error> {
            Ok(self.active_trip.lock().unwrap().clone())
        }
    }

    #[async_trait]
    impl CommandAPI for TestAPI {
        async fn send_command(&self, _car_id: Uuid, _command: CommandType) -> Result<Uuid, Error> {
            self.command_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Uuid::new_v4())
        }
    }

    impl API for TestAPI {}

    fn controller_with(api: TestAPI) -> (Arc<TestAPI>, SessionController) {
        let api = Arc::new(api);
        let controller = SessionController::new(api.clone() as DynAPI, Uuid::new_v4());
        (api, controller)
    }

    #[tokio::test]
    async fn reserve_activate_end_runs_the_full_lifecycle() {
        let (_, controller) = controller_with(TestAPI::default());
        let car_id = Uuid::new_v4();

        let session = controller.reserve(car_id).await.unwrap();
        assert_eq!(session.status.name(), "reserved");

        let session = controller.activate().await.unwrap();
        assert_eq!(session.status.name(), "active");
        assert_eq!(session.estimated_cost(), Some(60.0));

        let receipt = controller.end().await.unwrap();
        assert!(!receipt.qr_code_url.is_empty());

        let session = controller.snapshot().await;
        assert!(session.is_idle());
        assert_eq!(session.estimated_cost(), None);
    }

    #[tokio::test]
    async fn cancel_returns_to_idle_from_reserved_and_active() {
        let (_, controller) = controller_with(TestAPI::default());

        controller.reserve(Uuid::new_v4()).await.unwrap();
        let session = controller.cancel().await.unwrap();
        assert!(session.is_idle());

        controller.reserve(Uuid::new_v4()).await.unwrap();
        controller.activate().await.unwrap();
        let session = controller.cancel().await.unwrap();
        assert!(session.is_idle());
        assert_eq!(session.estimated_cost(), None);
    }

    #[tokio::test]
    async fn second_reserve_is_rejected_before_any_network_call() {
        let (api, controller) = controller_with(TestAPI::default());

        controller.reserve(Uuid::new_v4()).await.unwrap();
        let err = controller.reserve(Uuid::new_v4()).await.unwrap_err();

        assert_eq!(err.code, 100);
        assert_eq!(api.reserve_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn commands_are_refused_unless_a_trip_is_active() {
        let (api, controller) = controller_with(TestAPI::default());

        for command in CommandType::ALL {
            assert_eq!(controller.send_command(command).await.unwrap_err().code, 100);
        }

        controller.reserve(Uuid::new_v4()).await.unwrap();
        for command in CommandType::ALL {
            assert_eq!(controller.send_command(command).await.unwrap_err().code, 100);
        }
        assert_eq!(api.command_calls.load(Ordering::SeqCst), 0);

        controller.activate().await.unwrap();
        controller.send_command(CommandType::OpenDoor).await.unwrap();
        assert_eq!(api.command_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_activation_leaves_the_reservation_untouched() {
        let (_, controller) = controller_with(TestAPI {
            fail_activate: true,
            ..TestAPI::default()
        });

        controller.reserve(Uuid::new_v4()).await.unwrap();
        let err = controller.activate().await.unwrap_err();

        assert_eq!(err.code, 110);
        assert_eq!(err.message, "car is unreachable");
        assert_eq!(controller.snapshot().await.status.name(), "reserved");
    }

    #[tokio::test]
    async fn failed_end_keeps_the_trip_active() {
        let (_, controller) = controller_with(TestAPI {
            fail_end: true,
            ..TestAPI::default()
        });

        controller.reserve(Uuid::new_v4()).await.unwrap();
        controller.activate().await.unwrap();
        let err = controller.end().await.unwrap_err();

        assert_eq!(err.code, 110);

        let session = controller.snapshot().await;
        assert!(session.is_active());
        assert!(session.estimated_cost().is_some());
    }

    #[tokio::test]
    async fn a_transition_in_flight_blocks_every_other_transition() {
        let hold = Arc::new(Notify::new());
        let (_, controller) = controller_with(TestAPI {
            hold_reserve: Some(hold.clone()),
            ..TestAPI::default()
        });
        let controller = Arc::new(controller);

        let in_flight = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.reserve(Uuid::new_v4()).await })
        };

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert_eq!(controller.cancel().await.unwrap_err().code, 103);
        assert_eq!(
            controller
                .send_command(CommandType::OpenDoor)
                .await
                .unwrap_err()
                .code,
            103
        );

        hold.notify_one();
        let session = in_flight.await.unwrap().unwrap();
        assert_eq!(session.status.name(), "reserved");
    }

    #[tokio::test]
    async fn a_reset_during_a_slow_reserve_drops_the_late_response() {
        let hold = Arc::new(Notify::new());
        let (api, controller) = controller_with(TestAPI {
            hold_reserve: Some(hold.clone()),
            ..TestAPI::default()
        });
        let controller = Arc::new(controller);

        let in_flight = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.reserve(Uuid::new_v4()).await })
        };

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        controller.reset().await;
        hold.notify_one();

        let err = in_flight.await.unwrap().unwrap_err();
        assert_eq!(err.code, 104);
        assert!(controller.snapshot().await.is_idle());

        // the controller stays usable after the dropped response
        api.reserve_calls.store(0, Ordering::SeqCst);
        hold.notify_one();
        controller.reserve(Uuid::new_v4()).await.unwrap();
        assert_eq!(api.reserve_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rehydration_picks_up_a_reserved_trip() {
        let trip_id = Uuid::new_v4();
        let car_id = Uuid::new_v4();
        let api = TestAPI::default();
        *api.active_trip.lock().unwrap() = Some(Trip {
            id: trip_id,
            user_id: Uuid::new_v4(),
            car_id,
            status: TripStatus::Reserved,
            started_at: None,
            ended_at: None,
            created_at: Utc::now(),
        });

        let (_, controller) = controller_with(api);
        let session = controller.rehydrate().await.unwrap();

        assert_eq!(session.status.name(), "reserved");
        assert_eq!(session.trip_id(), Some(trip_id));
        assert_eq!(session.car_id(), Some(car_id));
    }

    #[tokio::test]
    async fn rehydration_seeds_the_estimate_from_the_server_start_time() {
        let api = TestAPI::default();
        *api.active_trip.lock().unwrap() = Some(Trip {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            car_id: Uuid::new_v4(),
            status: TripStatus::Active,
            started_at: Some(Utc::now() - ChronoDuration::minutes(5)),
            ended_at: None,
            created_at: Utc::now() - ChronoDuration::minutes(6),
        });

        let (_, controller) = controller_with(api);
        let session = controller.rehydrate().await.unwrap();

        assert!(session.is_active());
        assert_eq!(session.estimated_cost(), Some(10.0 * 5.0 + 50.0));
    }

    #[tokio::test]
    async fn rehydration_degrades_to_no_estimate_when_car_data_is_unavailable() {
        let api = TestAPI {
            fail_car_data: true,
            ..TestAPI::default()
        };
        *api.active_trip.lock().unwrap() = Some(Trip {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            car_id: Uuid::new_v4(),
            status: TripStatus::Active,
            started_at: Some(Utc::now()),
            ended_at: None,
            created_at: Utc::now(),
        });

        let (_, controller) = controller_with(api);
        let session = controller.rehydrate().await.unwrap();

        assert!(session.is_active());
        assert!(!session.has_pricing());
        assert_eq!(session.estimated_cost(), None);
    }

    #[tokio::test]
    async fn rehydration_ignores_finished_trips() {
        let api = TestAPI::default();
        *api.active_trip.lock().unwrap() = Some(Trip {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            car_id: Uuid::new_v4(),
            status: TripStatus::Completed,
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
            created_at: Utc::now(),
        });

        let (_, controller) = controller_with(api);
        let session = controller.rehydrate().await.unwrap();

        assert!(session.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn recompute_fires_immediately_and_then_on_every_interval() {
        let (_, controller) = controller_with(TestAPI::default());
        let events = controller.subscribe().await;

        controller.reserve(Uuid::new_v4()).await.unwrap();
        controller.activate().await.unwrap();

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        // seed + reserved + activated commits, plus the immediate tick
        let mut active_publishes = 0;
        while let Ok(snapshot) = events.try_recv() {
            if snapshot.is_active() {
                assert_eq!(snapshot.estimated_cost(), Some(60.0));
                active_publishes += 1;
            }
        }
        assert!(active_publishes >= 2);

        tokio::time::advance(RECOMPUTE_INTERVAL * 3).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let mut ticks = 0;
        while let Ok(snapshot) = events.try_recv() {
            assert!(snapshot.is_active());
            assert_eq!(snapshot.estimated_cost(), Some(60.0));
            ticks += 1;
        }
        assert!(ticks >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recompute_stops_the_moment_the_trip_ends() {
        let (_, controller) = controller_with(TestAPI::default());

        controller.reserve(Uuid::new_v4()).await.unwrap();
        controller.activate().await.unwrap();
        controller.end().await.unwrap();

        let events = controller.subscribe().await;
        let _ = events.try_recv(); // seed snapshot

        tokio::time::advance(RECOMPUTE_INTERVAL * 3).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert!(events.try_recv().is_err());
        assert!(controller.snapshot().await.is_idle());
    }
}
