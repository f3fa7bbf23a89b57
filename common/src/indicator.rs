use serde::Serialize;

pub const BLINK_PERIOD_MS: u64 = 1_000;
pub const BURST_TOGGLE_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Indicator {
    Off,
    SolidYellow,
    BlinkGreen,
    SolidGreen,
    SolidRed,
    BlinkRed,
    BlinkYellow,
    FastRedBurst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Yellow,
}

impl Color {
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            Self::Red => (255, 0, 0),
            Self::Green => (0, 255, 0),
            Self::Yellow => (255, 160, 0),
        }
    }
}

impl Indicator {
    /// Stable numeric code shared with the display driver.
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::SolidYellow => 1,
            Self::BlinkGreen => 2,
            Self::SolidGreen => 3,
            Self::SolidRed => 4,
            Self::BlinkRed => 5,
            Self::BlinkYellow => 6,
            Self::FastRedBurst => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Off),
            1 => Some(Self::SolidYellow),
            2 => Some(Self::BlinkGreen),
            3 => Some(Self::SolidGreen),
            4 => Some(Self::SolidRed),
            5 => Some(Self::BlinkRed),
            6 => Some(Self::BlinkYellow),
            7 => Some(Self::FastRedBurst),
            _ => None,
        }
    }

    pub fn is_one_shot(self) -> bool {
        self == Self::FastRedBurst
    }

    /// Colour to show `phase_ms` into the pattern, `None` meaning dark.
    pub fn pattern(self, phase_ms: u64) -> Option<Color> {
        let first_half = phase_ms % BLINK_PERIOD_MS < BLINK_PERIOD_MS / 2;
        match self {
            Self::Off => None,
            Self::SolidYellow => Some(Color::Yellow),
            Self::SolidGreen => Some(Color::Green),
            Self::SolidRed => Some(Color::Red),
            Self::BlinkGreen => first_half.then_some(Color::Green),
            Self::BlinkRed => first_half.then_some(Color::Red),
            Self::BlinkYellow => first_half.then_some(Color::Yellow),
            Self::FastRedBurst => {
                ((phase_ms / BURST_TOGGLE_MS) % 2 == 0).then_some(Color::Red)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisionSnapshot {
    pub indicator_enabled: bool,
    pub fatal: bool,
    pub booting: bool,
    pub warning_pending: bool,
    pub stale: bool,
    pub logging: bool,
    pub permanent_failure: bool,
}

/// Maps the supervision state onto one indicator directive. Pure; the
/// caller renders it.
pub fn select(snapshot: &SupervisionSnapshot) -> Indicator {
    if !snapshot.indicator_enabled {
        return Indicator::Off;
    }
    if snapshot.fatal {
        return Indicator::SolidRed;
    }
    if snapshot.booting {
        return Indicator::SolidYellow;
    }
    if snapshot.warning_pending {
        return Indicator::FastRedBurst;
    }

    match (snapshot.stale, snapshot.permanent_failure) {
        (true, true) => Indicator::BlinkRed,
        (true, false) => Indicator::BlinkYellow,
        (false, true) => Indicator::BlinkRed,
        (false, false) if snapshot.logging => Indicator::SolidGreen,
        (false, false) => Indicator::BlinkGreen,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn running() -> SupervisionSnapshot {
        SupervisionSnapshot {
            indicator_enabled: true,
            fatal: false,
            booting: false,
            warning_pending: false,
            stale: false,
            logging: false,
            permanent_failure: false,
        }
    }

    #[test]
    fn connected_states() {
        assert_eq!(select(&running()), Indicator::BlinkGreen);
        assert_eq!(
            select(&SupervisionSnapshot {
                logging: true,
                ..running()
            }),
            Indicator::SolidGreen
        );
    }

    #[test]
    fn stale_never_shows_green() {
        for logging in [false, true] {
            for permanent_failure in [false, true] {
                let indicator = select(&SupervisionSnapshot {
                    stale: true,
                    logging,
                    permanent_failure,
                    ..running()
                });
                assert!(matches!(
                    indicator,
                    Indicator::BlinkRed | Indicator::BlinkYellow
                ));
            }
        }
    }

    #[test]
    fn stale_with_fault_is_red() {
        let snapshot = SupervisionSnapshot {
            stale: true,
            permanent_failure: true,
            ..running()
        };
        assert_eq!(select(&snapshot), Indicator::BlinkRed);
        assert_eq!(
            select(&SupervisionSnapshot {
                permanent_failure: false,
                ..snapshot
            }),
            Indicator::BlinkYellow
        );
    }

    #[test]
    fn priorities() {
        let everything = SupervisionSnapshot {
            fatal: true,
            booting: true,
            warning_pending: true,
            stale: true,
            ..running()
        };
        assert_eq!(select(&everything), Indicator::SolidRed);
        assert_eq!(
            select(&SupervisionSnapshot {
                fatal: false,
                ..everything
            }),
            Indicator::SolidYellow
        );
        assert_eq!(
            select(&SupervisionSnapshot {
                fatal: false,
                booting: false,
                ..everything
            }),
            Indicator::FastRedBurst
        );
        assert_eq!(
            select(&SupervisionSnapshot {
                indicator_enabled: false,
                ..everything
            }),
            Indicator::Off
        );
    }

    #[test]
    fn codes_round_trip() {
        for code in 0..8 {
            assert_eq!(Indicator::from_code(code).map(Indicator::code), Some(code));
        }
        assert_eq!(Indicator::from_code(8), None);
    }

    #[test]
    fn blink_patterns() {
        assert_eq!(Indicator::BlinkGreen.pattern(0), Some(Color::Green));
        assert_eq!(Indicator::BlinkGreen.pattern(600), None);
        assert_eq!(Indicator::SolidRed.pattern(600), Some(Color::Red));
        assert_eq!(Indicator::FastRedBurst.pattern(50), Some(Color::Red));
        assert_eq!(Indicator::FastRedBurst.pattern(150), None);
        assert_eq!(Indicator::Off.pattern(0), None);
    }
}
