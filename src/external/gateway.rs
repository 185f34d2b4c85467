use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use uuid::Uuid;

use crate::api::{AuthAPI, CarAPI, CommandAPI, TripAPI, API};
use crate::entities::{AuthSession, Car, CarData, CommandType, NewUser, Receipt, Trip};
use crate::error::{rejection_error, unauthorized_error, upstream_error, Error};

// one instance per signed-in user; with_token attaches the bearer token
// issued by authenticate
#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token: None,
        }
    }

    pub fn from_env() -> Result<Self, Error> {
        Ok(Self::new(env::var("VECTURA_API_BASE")?))
    }

    pub fn with_token(self, token: String) -> Self {
        Self {
            token: Some(token),
            ..self
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request
    }
}

#[derive(Deserialize)]
struct RejectionBody {
    error: String,
}

#[derive(Serialize)]
struct TripParams {
    trip_id: Uuid,
}

#[derive(Serialize)]
struct ReserveParams {
    user_id: Uuid,
    car_id: Uuid,
}

#[derive(Deserialize)]
struct ReserveResponse {
    trip_id: Uuid,
}

#[derive(Deserialize)]
struct ActiveTripResponse {
    trip: Option<Trip>,
}

#[derive(Serialize)]
struct CommandParams {
    command_type: CommandType,
}

#[derive(Deserialize)]
struct CommandResponse {
    command_id: Uuid,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, Error> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(unauthorized_error());
    }

    if status.is_client_error() {
        // 4xx bodies carry {"error": "..."} meant for the caller's screen
        let text = response.text().await?;
        let message = serde_json::from_str::<RejectionBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);

        return Err(rejection_error(message));
    }

    if !status.is_success() {
        return Err(upstream_error());
    }

    Ok(response.json().await?)
}

#[async_trait]
impl AuthAPI for HttpGateway {
    #[tracing::instrument(skip(self, new_user))]
    async fn register(&self, new_user: NewUser) -> Result<AuthSession, Error> {
        let response = self
            .request(Method::POST, "/auth/register")
            .json(&new_user)
            .send()
            .await?;

        decode(response).await
    }

    #[tracing::instrument(skip(self, password))]
    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthSession, Error> {
        let response = self
            .request(Method::POST, "/auth/authenticate")
            .json(&Credentials { email, password })
            .send()
            .await?;

        decode(response).await
    }
}

#[async_trait]
impl CarAPI for HttpGateway {
    #[tracing::instrument(skip(self))]
    async fn list_available_cars(&self) -> Result<Vec<Car>, Error> {
        let response = self.request(Method::GET, "/cars").send().await?;

        decode(response).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_car_data(&self, car_id: Uuid) -> Result<CarData, Error> {
        let response = self
            .request(Method::GET, &format!("/cars/{}/data", car_id))
            .send()
            .await?;

        decode(response).await
    }
}

#[async_trait]
impl TripAPI for HttpGateway {
    #[tracing::instrument(skip(self))]
    async fn reserve_trip(&self, user_id: Uuid, car_id: Uuid) -> Result<Uuid, Error> {
        let response = self
            .request(Method::POST, "/trips/start")
            .json(&ReserveParams { user_id, car_id })
            .send()
            .await?;

        let reserved: ReserveResponse = decode(response).await?;

        Ok(reserved.trip_id)
    }

    #[tracing::instrument(skip(self))]
    async fn activate_trip(&self, trip_id: Uuid) -> Result<(), Error> {
        let response = self
            .request(Method::PUT, "/trips/activate")
            .json(&TripParams { trip_id })
            .send()
            .await?;

        let _: serde_json::Value = decode(response).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn end_trip(&self, trip_id: Uuid) -> Result<Receipt, Error> {
        let response = self
            .request(Method::PUT, "/trips/end")
            .json(&TripParams { trip_id })
            .send()
            .await?;

        decode(response).await
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_trip(&self, trip_id: Uuid) -> Result<(), Error> {
        let response = self
            .request(Method::PUT, "/trips/cancel")
            .json(&TripParams { trip_id })
            .send()
            .await?;

        let _: serde_json::Value = decode(response).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn find_active_trip(&self, user_id: Uuid) -> Result<Option<Trip>, Error> {
        let response = self
            .request(Method::GET, &format!("/trips/active?user_id={}", user_id))
            .send()
            .await?;

        let active: ActiveTripResponse = decode(response).await?;

        Ok(active.trip)
    }
}

#[async_trait]
impl CommandAPI for HttpGateway {
    #[tracing::instrument(skip(self))]
    async fn send_command(&self, car_id: Uuid, command: CommandType) -> Result<Uuid, Error> {
        let response = self
            .request(Method::POST, &format!("/cars/{}/commands", car_id))
            .json(&CommandParams {
                command_type: command,
            })
            .send()
            .await?;

        let dispatched: CommandResponse = decode(response).await?;

        Ok(dispatched.command_id)
    }
}

impl API for HttpGateway {}
