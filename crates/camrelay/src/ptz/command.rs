//! PTZ command validation and translation to the ISAPI motion vector.

use serde::Deserialize;

/// Speed used when the request omits one.
pub const DEFAULT_SPEED: i64 = 60;

/// Highest speed the camera accepts on each axis.
pub const MAX_SPEED: u8 = 100;

/// XML namespace of the ISAPI PTZData document.
const PTZ_XML_NAMESPACE: &str = "http://www.hikvision.com/ver20/XMLSchema";

// ── Errors ──────────────────────────────────────────────────────────

/// Rejections raised before anything is sent to the camera.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("speed must be between 0 and {max}, got {0}", max = MAX_SPEED)]
    SpeedOutOfRange(i64),

    #[error("unsupported action '{0}' (expected 'move')")]
    UnsupportedAction(String),

    #[error("direction must not be empty")]
    EmptyDirection,
}

// ── Request ─────────────────────────────────────────────────────────

/// JSON body of `POST /api/proxy`.
#[derive(Debug, Clone, Deserialize)]
pub struct PtzRequest {
    pub action: String,
    pub direction: String,
    #[serde(default = "default_speed")]
    pub speed: i64,
}

fn default_speed() -> i64 {
    DEFAULT_SPEED
}

impl PtzRequest {
    /// Check the request shape and produce a command.
    pub fn validate(&self) -> Result<PtzCommand, ValidationError> {
        if !self.action.trim().eq_ignore_ascii_case("move") {
            return Err(ValidationError::UnsupportedAction(self.action.clone()));
        }
        if self.direction.trim().is_empty() {
            return Err(ValidationError::EmptyDirection);
        }
        Ok(PtzCommand {
            direction: Direction::parse(&self.direction),
            speed: Speed::new(self.speed)?,
        })
    }
}

// ── Command ─────────────────────────────────────────────────────────

/// Speed in 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Speed(u8);

impl Speed {
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        match u8::try_from(value) {
            Ok(v) if v <= MAX_SPEED => Ok(Self(v)),
            _ => Err(ValidationError::SpeedOutOfRange(value)),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// Symbolic movement requested by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
    ZoomIn,
    ZoomOut,
    Stop,
    Home,
    /// Anything else; treated like `Stop`
    Other(String),
}

impl Direction {
    /// Parse a direction token. `zoom-in`, `Zoom_In` and `zoom_in` are equivalent.
    pub fn parse(token: &str) -> Self {
        let normalized = token.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "left" => Direction::Left,
            "right" => Direction::Right,
            "up" => Direction::Up,
            "down" => Direction::Down,
            "up_left" => Direction::UpLeft,
            "up_right" => Direction::UpRight,
            "down_left" => Direction::DownLeft,
            "down_right" => Direction::DownRight,
            "zoom_in" => Direction::ZoomIn,
            "zoom_out" => Direction::ZoomOut,
            "stop" => Direction::Stop,
            "home" => Direction::Home,
            _ => Direction::Other(token.to_string()),
        }
    }

    /// Unit signs `(pan, tilt, zoom)` for this direction.
    fn signs(&self) -> (i32, i32, i32) {
        match self {
            Direction::Left => (-1, 0, 0),
            Direction::Right => (1, 0, 0),
            Direction::Up => (0, 1, 0),
            Direction::Down => (0, -1, 0),
            Direction::UpLeft => (-1, 1, 0),
            Direction::UpRight => (1, 1, 0),
            Direction::DownLeft => (-1, -1, 0),
            Direction::DownRight => (1, -1, 0),
            Direction::ZoomIn => (0, 0, 1),
            Direction::ZoomOut => (0, 0, -1),
            Direction::Stop | Direction::Home | Direction::Other(_) => (0, 0, 0),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Direction::Other(_))
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::UpLeft => "up_left",
            Direction::UpRight => "up_right",
            Direction::DownLeft => "down_left",
            Direction::DownRight => "down_right",
            Direction::ZoomIn => "zoom_in",
            Direction::ZoomOut => "zoom_out",
            Direction::Stop => "stop",
            Direction::Home => "home",
            Direction::Other(token) => token.as_str(),
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtzCommand {
    pub direction: Direction,
    pub speed: Speed,
}

/// Continuous-move velocities sent to the camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionVector {
    pub pan: i32,
    pub tilt: i32,
    pub zoom: i32,
}

impl MotionVector {
    pub fn is_zero(&self) -> bool {
        *self == MotionVector::default()
    }
}

impl From<&PtzCommand> for MotionVector {
    fn from(command: &PtzCommand) -> Self {
        let s = i32::from(command.speed.get());
        let (pan, tilt, zoom) = command.direction.signs();
        MotionVector {
            pan: pan * s,
            tilt: tilt * s,
            zoom: zoom * s,
        }
    }
}

/// XML body of the ISAPI continuous-move request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPayload {
    vector: MotionVector,
    body: String,
}

impl ControlPayload {
    pub const CONTENT_TYPE: &'static str = "application/xml";

    pub fn new(vector: MotionVector) -> Self {
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <PTZData version=\"2.0\" xmlns=\"{ns}\">\n\
             \x20 <pan>{pan}</pan>\n\
             \x20 <tilt>{tilt}</tilt>\n\
             \x20 <zoom>{zoom}</zoom>\n\
             </PTZData>\n",
            ns = PTZ_XML_NAMESPACE,
            pan = vector.pan,
            tilt = vector.tilt,
            zoom = vector.zoom,
        );
        Self { vector, body }
    }

    pub fn vector(&self) -> MotionVector {
        self.vector
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Translate a validated command into the camera payload.
pub fn translate(command: &PtzCommand) -> ControlPayload {
    ControlPayload::new(MotionVector::from(command))
}
