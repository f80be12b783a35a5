use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, Level};

use common::types::Health;
use service::api::requests::{DeleteJobRequest, StatusRequest};
use service::api::{Envelope, RequestDispatcher};
use service::errors::ServiceError;

type Dispatcher = State<Arc<RequestDispatcher>>;

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn create_service(State(d): Dispatcher, Path(name): Path<String>, body: String) -> Envelope {
    d.create_service(&name, &body).await
}

async fn service_info(State(d): Dispatcher, Path(name): Path<String>) -> Envelope {
    d.service_info(&name).await
}

async fn delete_service(State(d): Dispatcher, Path(name): Path<String>) -> Envelope {
    d.delete_service(&name).await
}

async fn info(State(d): Dispatcher) -> Envelope {
    d.info().await
}

async fn train(State(d): Dispatcher, body: String) -> Envelope {
    d.train(&body).await
}

async fn train_status(State(d): Dispatcher, query: Result<Query<StatusRequest>, QueryRejection>) -> Envelope {
    match query {
        Ok(Query(req)) => d.train_status_request(req).await,
        Err(rejection) => bad_query(&d, rejection),
    }
}

async fn train_delete(State(d): Dispatcher, query: Result<Query<DeleteJobRequest>, QueryRejection>) -> Envelope {
    match query {
        Ok(Query(req)) => d.train_delete_request(req).await,
        Err(rejection) => bad_query(&d, rejection),
    }
}

fn bad_query(d: &RequestDispatcher, rejection: QueryRejection) -> Envelope {
    debug!(error = %rejection, "query rejected");
    d.reject_train(ServiceError::BadRequest(rejection.body_text()))
}

/// Build the application router over a shared dispatcher.
pub fn build_router(dispatcher: Arc<RequestDispatcher>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/services/:name", put(create_service).get(service_info).delete(delete_service))
        .route("/train", get(train_status).post(train).delete(train_delete))
        .with_state(dispatcher)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                // 5xx
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
