use std::env;
use std::sync::Arc;
use std::time::Duration;

use vectura::api::{AuthAPI, CarAPI, DynAPI};
use vectura::controller::SessionController;
use vectura::external::HttpGateway;
use vectura::simulation;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    if env::args().any(|arg| arg == "--simulate") {
        simulation::run_local(8, 40).await;
        return;
    }

    let gateway = HttpGateway::from_env().unwrap();
    let email = env::var("VECTURA_EMAIL").unwrap();
    let password = env::var("VECTURA_PASSWORD").unwrap();

    let account = gateway.authenticate(&email, &password).await.unwrap();
    let api: DynAPI = Arc::new(gateway.with_token(account.token));

    let controller = SessionController::new(api.clone(), account.user_id);

    let session = controller.rehydrate().await.unwrap();
    tracing::info!(status = %session.status.name(), "session rehydrated");

    if !session.is_idle() {
        tracing::info!("an open trip was picked up, leaving it alone");
        return;
    }

    let cars = api.list_available_cars().await.unwrap();
    let car = match cars.first() {
        Some(car) => car,
        None => {
            tracing::warn!("no cars available");
            return;
        }
    };
    tracing::info!(model = %car.model, license_plate = %car.license_plate, "reserving");

    controller.reserve(car.id).await.unwrap();
    controller.activate().await.unwrap();

    let events = controller.subscribe().await;
    let watcher = tokio::spawn(async move {
        while let Ok(snapshot) = events.recv().await {
            if let Some(cost) = snapshot.estimated_cost() {
                tracing::info!(estimated_cost = cost, "estimate updated");
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(30)).await;

    let receipt = controller.end().await.unwrap();
    tracing::info!(qr_code_url = %receipt.qr_code_url, "scan to pay");

    controller.reset().await;
    watcher.abort();
}
