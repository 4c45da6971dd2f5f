use crate::error::ScheduleError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

///
/// Administration frequency codes.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Od,
    Bd,
    Tds,
    Qid,
    Q2h,
    Q3h,
    Q4h,
    Q6h,
    Q8h,
    Q12h,
    Stat,
    Prn,
    Continuous,
}

impl Frequency {
    /// Doses per day for fixed-interval codes
    pub fn per_day(&self) -> Option<u32> {
        match self {
            Frequency::Od => Some(1),
            Frequency::Bd => Some(2),
            Frequency::Tds => Some(3),
            Frequency::Qid => Some(4),
            Frequency::Q2h => Some(12),
            Frequency::Q3h => Some(8),
            Frequency::Q4h => Some(6),
            Frequency::Q6h => Some(4),
            Frequency::Q8h => Some(3),
            Frequency::Q12h => Some(2),
            Frequency::Stat | Frequency::Prn | Frequency::Continuous => None,
        }
    }

    pub fn is_prn(&self) -> bool {
        matches!(self, Frequency::Prn)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Frequency::Od => "OD",
            Frequency::Bd => "BD",
            Frequency::Tds => "TDS",
            Frequency::Qid => "QID",
            Frequency::Q2h => "Q2H",
            Frequency::Q3h => "Q3H",
            Frequency::Q4h => "Q4H",
            Frequency::Q6h => "Q6H",
            Frequency::Q8h => "Q8H",
            Frequency::Q12h => "Q12H",
            Frequency::Stat => "STAT",
            Frequency::Prn => "PRN",
            Frequency::Continuous => "CONTINUOUS",
        }
    }
}

impl Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Frequency {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let frequency = match s.trim().to_ascii_uppercase().as_str() {
            "OD" | "QD" | "DAILY" => Frequency::Od,
            "BD" | "BID" => Frequency::Bd,
            "TDS" | "TID" => Frequency::Tds,
            "QID" | "QDS" => Frequency::Qid,
            "Q2H" => Frequency::Q2h,
            "Q3H" => Frequency::Q3h,
            "Q4H" => Frequency::Q4h,
            "Q6H" => Frequency::Q6h,
            "Q8H" => Frequency::Q8h,
            "Q12H" => Frequency::Q12h,
            "STAT" => Frequency::Stat,
            "PRN" => Frequency::Prn,
            "CONTINUOUS" => Frequency::Continuous,
            _ => {
                return Err(ScheduleError::InvalidFrequencyCode {
                    code: s.to_owned(),
                })
            }
        };
        Ok(frequency)
    }
}
