//! Tuple domain types and the canonical cache-key codec
//!
//! The rate-bearing tuple `(period, hotel, room)` is drawn from small
//! fixed enumerations. Every replica must derive the same cache key for
//! the same tuple, byte for byte, so the key is the compact JSON encoding
//! of [`RateQuery`] with its fields in declaration order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Booking period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Summer,
    Autumn,
    Winter,
    Spring,
}

/// Hotel in the bounded catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hotel {
    FloatingPointResort,
    RecursiveRetreat,
    BigOBoutique,
}

/// Room category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Room {
    SingletonRoom,
    DoubleBufferRoom,
    QuadTreeSuite,
}

impl Period {
    pub const ALL: [Period; 4] = [
        Period::Summer,
        Period::Autumn,
        Period::Winter,
        Period::Spring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Summer => "Summer",
            Period::Autumn => "Autumn",
            Period::Winter => "Winter",
            Period::Spring => "Spring",
        }
    }
}

impl Hotel {
    pub const ALL: [Hotel; 3] = [
        Hotel::FloatingPointResort,
        Hotel::RecursiveRetreat,
        Hotel::BigOBoutique,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hotel::FloatingPointResort => "FloatingPointResort",
            Hotel::RecursiveRetreat => "RecursiveRetreat",
            Hotel::BigOBoutique => "BigOBoutique",
        }
    }
}

impl Room {
    pub const ALL: [Room; 3] = [
        Room::SingletonRoom,
        Room::DoubleBufferRoom,
        Room::QuadTreeSuite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Room::SingletonRoom => "SingletonRoom",
            Room::DoubleBufferRoom => "DoubleBufferRoom",
            Room::QuadTreeSuite => "QuadTreeSuite",
        }
    }
}

/// Human-readable message for a value outside an enumeration.
///
/// The exact wording is part of the HTTP contract: it is surfaced verbatim
/// in the `errors` map of 400 responses.
fn field_error(field: &str, allowed: &[&str]) -> String {
    format!("The {field} field must be one of: {}.", allowed.join(", "))
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| {
                field_error("period", &Period::ALL.map(|p| p.as_str()))
            })
    }
}

impl FromStr for Hotel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hotel::ALL
            .iter()
            .find(|h| h.as_str() == s)
            .copied()
            .ok_or_else(|| field_error("hotel", &Hotel::ALL.map(|h| h.as_str())))
    }
}

impl FromStr for Room {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Room::ALL
            .iter()
            .find(|r| r.as_str() == s)
            .copied()
            .ok_or_else(|| field_error("room", &Room::ALL.map(|r| r.as_str())))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Hotel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated rate lookup tuple.
///
/// Field order matters: the cache key is the compact JSON encoding of this
/// struct, and the registry and revalidator round-trip tuples through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateQuery {
    pub period: Period,
    pub hotel: Hotel,
    pub room: Room,
}

impl RateQuery {
    pub fn new(period: Period, hotel: Hotel, room: Room) -> Self {
        Self {
            period,
            hotel,
            room,
        }
    }

    /// Canonical cache key for this tuple, identical across replicas.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).expect("rate query always encodes")
    }

    /// Decode a registry member back into a tuple.
    ///
    /// Registry members are produced by [`RateQuery::cache_key`], so a
    /// decode failure means the registry was tampered with or corrupted;
    /// callers count such members as errors and skip them.
    pub fn from_cache_key(key: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parses_all_variants() {
        for period in Period::ALL {
            assert_eq!(period.as_str().parse::<Period>().unwrap(), period);
        }
    }

    #[test]
    fn test_period_rejects_unknown_value() {
        let err = "summer-2024".parse::<Period>().unwrap_err();
        assert_eq!(
            err,
            "The period field must be one of: Summer, Autumn, Winter, Spring."
        );
    }

    #[test]
    fn test_hotel_rejects_unknown_value() {
        let err = "GrandHotel".parse::<Hotel>().unwrap_err();
        assert_eq!(
            err,
            "The hotel field must be one of: FloatingPointResort, RecursiveRetreat, BigOBoutique."
        );
    }

    #[test]
    fn test_room_rejects_unknown_value() {
        let err = "".parse::<Room>().unwrap_err();
        assert_eq!(
            err,
            "The room field must be one of: SingletonRoom, DoubleBufferRoom, QuadTreeSuite."
        );
    }

    #[test]
    fn test_cache_key_is_compact_and_ordered() {
        let query = RateQuery::new(
            Period::Summer,
            Hotel::FloatingPointResort,
            Room::SingletonRoom,
        );
        assert_eq!(
            query.cache_key(),
            r#"{"period":"Summer","hotel":"FloatingPointResort","room":"SingletonRoom"}"#
        );
    }

    #[test]
    fn test_cache_key_round_trips() {
        for period in Period::ALL {
            for hotel in Hotel::ALL {
                for room in Room::ALL {
                    let query = RateQuery::new(period, hotel, room);
                    let decoded = RateQuery::from_cache_key(&query.cache_key()).unwrap();
                    assert_eq!(decoded, query);
                }
            }
        }
    }

    #[test]
    fn test_malformed_cache_key_is_rejected() {
        assert!(RateQuery::from_cache_key("not json").is_err());
        assert!(RateQuery::from_cache_key(r#"{"period":"Summer"}"#).is_err());
        assert!(
            RateQuery::from_cache_key(
                r#"{"period":"Mondays","hotel":"FloatingPointResort","room":"SingletonRoom"}"#
            )
            .is_err()
        );
    }
}
