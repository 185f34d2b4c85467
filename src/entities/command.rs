use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    OpenDoor,
    CloseDoor,
    StartEngine,
    StopEngine,
}

impl CommandType {
    pub const ALL: [CommandType; 4] = [
        Self::OpenDoor,
        Self::CloseDoor,
        Self::StartEngine,
        Self::StopEngine,
    ];

    pub fn name(&self) -> String {
        match self {
            Self::OpenDoor => "open_door".into(),
            Self::CloseDoor => "close_door".into(),
            Self::StartEngine => "start_engine".into(),
            Self::StopEngine => "stop_engine".into(),
        }
    }
}
