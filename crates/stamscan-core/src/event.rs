use std::fmt;

use anyhow::Context;
use stamscan_proto::proto::{self, TransitionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    BecameEmpty,
    BecameFull,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::BecameEmpty => write!(f, "became_empty"),
            Transition::BecameFull => write!(f, "became_full"),
        }
    }
}

/// A bar state change at a given frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaminaEvent {
    pub frame_index: u32,
    pub transition: Transition,
}

impl StaminaEvent {
    pub fn is_empty_event(&self) -> bool {
        self.transition == Transition::BecameEmpty
    }
}

/// Format a frame position as `MM:SS`. Minutes are not capped at 60.
pub fn format_timestamp(frame_index: u32, fps: f64) -> String {
    let seconds = if fps > 0.0 {
        (frame_index as f64 / fps) as u64
    } else {
        0
    };
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

impl From<StaminaEvent> for proto::StaminaEvent {
    fn from(e: StaminaEvent) -> Self {
        let kind = match e.transition {
            Transition::BecameEmpty => TransitionKind::BecameEmpty,
            Transition::BecameFull => TransitionKind::BecameFull,
        };
        proto::StaminaEvent {
            frame_index: e.frame_index,
            kind: kind as i32,
        }
    }
}

impl TryFrom<proto::StaminaEvent> for StaminaEvent {
    type Error = anyhow::Error;

    fn try_from(e: proto::StaminaEvent) -> anyhow::Result<Self> {
        let kind = TransitionKind::try_from(e.kind)
            .ok()
            .with_context(|| format!("unknown transition kind {}", e.kind))?;
        let transition = match kind {
            TransitionKind::BecameEmpty => Transition::BecameEmpty,
            TransitionKind::BecameFull => Transition::BecameFull,
            TransitionKind::Unspecified => anyhow::bail!("unspecified transition kind"),
        };
        Ok(StaminaEvent {
            frame_index: e.frame_index,
            transition,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_zero_padded() {
        assert_eq!(format_timestamp(0, 30.0), "00:00");
        assert_eq!(format_timestamp(310, 30.0), "00:10");
        assert_eq!(format_timestamp(30 * 65, 30.0), "01:05");
    }

    #[test]
    fn minutes_are_not_capped() {
        assert_eq!(format_timestamp(60 * 60 * 125 + 60 * 7, 60.0), "125:07");
    }

    #[test]
    fn unknown_fps_maps_to_zero() {
        assert_eq!(format_timestamp(1234, 0.0), "00:00");
    }

    #[test]
    fn proto_kind_round_trip() {
        let event = StaminaEvent {
            frame_index: 9,
            transition: Transition::BecameFull,
        };
        let wire = proto::StaminaEvent::from(event);
        assert_eq!(wire.kind, TransitionKind::BecameFull as i32);
        assert_eq!(StaminaEvent::try_from(wire).unwrap(), event);

        let bad = proto::StaminaEvent {
            frame_index: 1,
            kind: 0,
        };
        assert!(StaminaEvent::try_from(bad).is_err());
    }
}
