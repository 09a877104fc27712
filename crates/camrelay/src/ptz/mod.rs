//! Pan-tilt-zoom control: request validation, vector translation and the
//! digest-authenticated camera client.

pub mod client;
pub mod command;

pub use client::{CameraControlClient, ClientError, Outcome};
pub use command::{
    translate, ControlPayload, Direction, MotionVector, PtzCommand, PtzRequest, Speed,
    ValidationError,
};
