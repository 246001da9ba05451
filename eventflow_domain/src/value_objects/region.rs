// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Region Value Object
//!
//! The five geographic regions events are reported from. The wire form is
//! the lowercase Spanish name (`norte`, `sur`, `centro`, `este`, `oeste`);
//! any other value fails envelope validation.
//!
//! The aggregator intentionally does *not* use this enum for its counters:
//! replayed or hand-injected events may carry an unrecognized region, and
//! the window buckets those under the literal key `"unknown"` instead of
//! rejecting them. The enum is the validation contract, not the aggregation
//! key space.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::PipelineError;

/// Geographic region of an event envelope.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Norte,
    Sur,
    Centro,
    Este,
    Oeste,
}

impl Region {
    /// All recognized regions, in declaration order.
    pub const ALL: [Region; 5] = [
        Region::Norte,
        Region::Sur,
        Region::Centro,
        Region::Este,
        Region::Oeste,
    ];

    /// Returns the lowercase wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Norte => "norte",
            Region::Sur => "sur",
            Region::Centro => "centro",
            Region::Este => "este",
            Region::Oeste => "oeste",
        }
    }
}

impl FromStr for Region {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "norte" => Ok(Region::Norte),
            "sur" => Ok(Region::Sur),
            "centro" => Ok(Region::Centro),
            "este" => Ok(Region::Este),
            "oeste" => Ok(Region::Oeste),
            other => Err(PipelineError::validation_error(format!(
                "region '{}' is not one of norte, sur, centro, este, oeste",
                other
            ))),
        }
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_regions() {
        for region in Region::ALL {
            assert_eq!(region.as_str().parse::<Region>().unwrap(), region);
        }
    }

    #[test]
    fn test_rejects_unknown_and_uppercase() {
        assert!("atacama".parse::<Region>().is_err());
        assert!("Norte".parse::<Region>().is_err());
        assert!("".parse::<Region>().is_err());
    }

    #[test]
    fn test_serde_wire_form_is_lowercase() {
        assert_eq!(serde_json::to_string(&Region::Centro).unwrap(), "\"centro\"");
        let back: Region = serde_json::from_str("\"oeste\"").unwrap();
        assert_eq!(back, Region::Oeste);
    }
}
