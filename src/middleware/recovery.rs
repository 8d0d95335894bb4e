//! Panic recovery
//!
//! Outermost stage. A panic anywhere below it is caught while the request
//! future is polled, logged, and answered with a generic 500. The worker
//! thread and the connection both survive.

use async_trait::async_trait;
use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

use super::{Next, RequestContext, Stage};
use crate::error::INTERNAL_ERROR_BODY;

pub struct RecoveryStage;

#[async_trait]
impl Stage for RecoveryStage {
    fn name(&self) -> &'static str {
        "recovery"
    }

    async fn handle(&self, ctx: &mut RequestContext, request: Request, next: Next<'_>) -> Response {
        let outcome = AssertUnwindSafe(next.run(ctx, request)).catch_unwind().await;
        match outcome {
            Ok(response) => response,
            Err(payload) => {
                tracing::error!(
                    method = %ctx.method,
                    path = %ctx.path,
                    ip = %ctx.client_ip,
                    request_id = ctx.request_id_str(),
                    panic = panic_message(payload.as_ref()),
                    "Recovered from panic while handling request"
                );
                ctx.status = Some(StatusCode::INTERNAL_SERVER_ERROR);
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
