//! Shared application state for Axum routers.

use std::time::Instant;

use axum::extract::FromRef;

use crate::pipeline::DashboardPipeline;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: DashboardPipeline,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: DashboardPipeline) -> Self {
        Self {
            pipeline,
            start_time: Instant::now(),
        }
    }
}

macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl FromRef<AppState> for $type {
            fn from_ref(state: &AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}

impl_from_ref!(DashboardPipeline, pipeline);
impl_from_ref!(Instant, start_time);
