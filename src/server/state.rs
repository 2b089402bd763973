use crate::location::ResolutionPipeline;
use std::sync::Mutex;

pub struct AppState {
    pub pipeline: Mutex<ResolutionPipeline>,
}
