//! X10 house, unit and command codes.
//!
//! An X10 send is two `02 63` messages: the house nibble combined with the
//! unit nibble (flag `0x00`), then the house nibble combined with the command
//! nibble (flag `0x80`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InsteonError;

/// Second byte of an X10 send that carries a unit code.
pub const UNIT_CODE_FLAG: u8 = 0x00;

/// Second byte of an X10 send that carries a command.
pub const COMMAND_FLAG: u8 = 0x80;

/// Nibble order shared by house letters `A..=P` and units `1..=16`.
const NIBBLES: [u8; 16] = [
    0x6, 0xE, 0x2, 0xA, 0x1, 0x9, 0x5, 0xD, 0x7, 0xF, 0x3, 0xB, 0x0, 0x8, 0x4, 0xC,
];

/// Nibble for house code `A..=P` (case-insensitive).
pub fn house_code(house: char) -> Result<u8, InsteonError> {
    let upper = house.to_ascii_uppercase();
    if !('A'..='P').contains(&upper) {
        return Err(InsteonError::InvalidParameter(format!(
            "Invalid X10 house code: {}",
            house
        )));
    }
    Ok(NIBBLES[(upper as u8 - b'A') as usize])
}

/// Nibble for unit `1..=16`.
pub fn unit_code(unit: u8) -> Result<u8, InsteonError> {
    match unit {
        1..=16 => Ok(NIBBLES[(unit - 1) as usize]),
        _ => Err(InsteonError::InvalidParameter(format!(
            "Invalid X10 unit code: {}",
            unit
        ))),
    }
}

/// X10 function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum X10Command {
    AllUnitsOff,
    AllLightsOn,
    On,
    Off,
    Dim,
    Bright,
    AllLightsOff,
    ExtendedCode,
    HailRequest,
    HailAck,
    PresetDimLow,
    PresetDimHigh,
    ExtendedData,
    StatusOn,
    StatusOff,
    StatusRequest,
}

impl X10Command {
    /// The command nibble.
    pub fn code(self) -> u8 {
        match self {
            X10Command::AllUnitsOff => 0x0,
            X10Command::AllLightsOn => 0x1,
            X10Command::On => 0x2,
            X10Command::Off => 0x3,
            X10Command::Dim => 0x4,
            X10Command::Bright => 0x5,
            X10Command::AllLightsOff => 0x6,
            X10Command::ExtendedCode => 0x7,
            X10Command::HailRequest => 0x8,
            X10Command::HailAck => 0x9,
            X10Command::PresetDimLow => 0xA,
            X10Command::PresetDimHigh => 0xB,
            X10Command::ExtendedData => 0xC,
            X10Command::StatusOn => 0xD,
            X10Command::StatusOff => 0xE,
            X10Command::StatusRequest => 0xF,
        }
    }

    fn name(self) -> &'static str {
        match self {
            X10Command::AllUnitsOff => "all units off",
            X10Command::AllLightsOn => "all lights on",
            X10Command::On => "on",
            X10Command::Off => "off",
            X10Command::Dim => "dim",
            X10Command::Bright => "bright",
            X10Command::AllLightsOff => "all lights off",
            X10Command::ExtendedCode => "extended code",
            X10Command::HailRequest => "hail request",
            X10Command::HailAck => "hail ack",
            X10Command::PresetDimLow => "preset dim low",
            X10Command::PresetDimHigh => "preset dim",
            X10Command::ExtendedData => "extended data",
            X10Command::StatusOn => "status = on",
            X10Command::StatusOff => "status = off",
            X10Command::StatusRequest => "status request",
        }
    }
}

impl fmt::Display for X10Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for X10Command {
    type Err = InsteonError;

    /// Parse a command name, case-insensitive. `status on` and `status = on`
    /// are both accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(" = ", " ");
        let cmd = match normalized.as_str() {
            "all units off" => X10Command::AllUnitsOff,
            "all lights on" => X10Command::AllLightsOn,
            "on" => X10Command::On,
            "off" => X10Command::Off,
            "dim" => X10Command::Dim,
            "bright" => X10Command::Bright,
            "all lights off" => X10Command::AllLightsOff,
            "extended code" => X10Command::ExtendedCode,
            "hail request" => X10Command::HailRequest,
            "hail ack" => X10Command::HailAck,
            "preset dim low" => X10Command::PresetDimLow,
            "preset dim" | "preset dim high" => X10Command::PresetDimHigh,
            "extended data" => X10Command::ExtendedData,
            "status on" => X10Command::StatusOn,
            "status off" => X10Command::StatusOff,
            "status request" => X10Command::StatusRequest,
            _ => {
                return Err(InsteonError::InvalidParameter(format!(
                    "Invalid X10 command: {}",
                    s
                )))
            }
        };
        Ok(cmd)
    }
}

impl TryFrom<String> for X10Command {
    type Error = InsteonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<X10Command> for String {
    fn from(value: X10Command) -> Self {
        value.name().to_string()
    }
}

/// The two raw bytes (`house|unit`, `house|command`) for an X10 send.
pub fn encode(house: char, unit: u8, command: X10Command) -> Result<(u8, u8), InsteonError> {
    let h = house_code(house)?;
    let u = unit_code(unit)?;
    Ok(((h << 4) | u, (h << 4) | command.code()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_house_codes() {
        assert_eq!(house_code('A').unwrap(), 0x6);
        assert_eq!(house_code('m').unwrap(), 0x0);
        assert_eq!(house_code('P').unwrap(), 0xC);
        assert!(house_code('Q').is_err());
    }

    #[test]
    fn test_unit_codes() {
        assert_eq!(unit_code(1).unwrap(), 0x6);
        assert_eq!(unit_code(16).unwrap(), 0xC);
        assert!(unit_code(0).is_err());
        assert!(unit_code(17).is_err());
    }

    #[test]
    fn test_encode_a1_on() {
        assert_eq!(encode('A', 1, X10Command::On).unwrap(), (0x66, 0x62));
    }

    #[test]
    fn test_command_names() {
        assert_eq!("ON".parse::<X10Command>().unwrap(), X10Command::On);
        assert_eq!(
            "status = on".parse::<X10Command>().unwrap(),
            X10Command::StatusOn
        );
        assert_eq!(
            "preset dim".parse::<X10Command>().unwrap().code(),
            0xB
        );
        assert!(matches!(
            "explode".parse::<X10Command>(),
            Err(InsteonError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for code in 0..16u8 {
            let cmd = [
                X10Command::AllUnitsOff,
                X10Command::AllLightsOn,
                X10Command::On,
                X10Command::Off,
                X10Command::Dim,
                X10Command::Bright,
                X10Command::AllLightsOff,
                X10Command::ExtendedCode,
                X10Command::HailRequest,
                X10Command::HailAck,
                X10Command::PresetDimLow,
                X10Command::PresetDimHigh,
                X10Command::ExtendedData,
                X10Command::StatusOn,
                X10Command::StatusOff,
                X10Command::StatusRequest,
            ][code as usize];
            assert_eq!(cmd.code(), code);
            assert_eq!(cmd.to_string().parse::<X10Command>().unwrap(), cmd);
        }
    }
}
