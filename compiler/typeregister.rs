// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
 The closed tables of built-in knowledge: how editor types map onto Galaxy
 types, which return types have a default value, where each target-filter
 category sits in the 62-bit mask, and the handful of native elements the
 generator knows by id.
*/

/// The library tag of the built-in ("Native") library.
pub const NATIVE_LIBRARY: &str = "Ntve";

/// The native "Custom Script" action: its `ScriptCode` lives on the call,
/// not on the definition.
pub const CUSTOM_SCRIPT_DEF_ID: &str = "00000123";

/// The native If-Then-Else definition. Its else branch declares its
/// synthesized variables before the then branch's, which takes a snapshot of
/// the auto-variable insertion point.
pub const IF_THEN_ELSE_DEF_ID: &str = "00000137";

/// Editor types that have no Galaxy counterpart collapse onto one.
pub fn remap_type(ty: &str) -> &str {
    match ty {
        "gamelink" => "string",
        "difficulty" => "int",
        "filepath" => "string",
        "userinstance" => "string",
        "actormsg" => "string",
        "catalogfieldpath" => "string",
        "userfield" => "string",
        "layoutframe" => "string",
        other => other,
    }
}

/// The default value a function of the given return type falls back to.
/// Types outside the table have no spelled-out default.
pub fn default_return_value(ty: &str) -> Option<&'static str> {
    match ty {
        "bool" => Some("true"),
        "int" => Some("0"),
        "string" => Some("null"),
        _ => None,
    }
}

/// Bit position of a target-filter category inside the `unitfilter` mask.
pub fn target_filter_bit(category: &str) -> Option<u32> {
    let bit = match category {
        "Self" => 0,
        "Player" => 1,
        "Ally" => 2,
        "Neutral" => 3,
        "Enemy" => 4,
        "Air" => 5,
        "Ground" => 6,
        "Light" => 7,
        "Armored" => 8,
        "Biological" => 9,
        "Robotic" => 10,
        "Mechanical" => 11,
        "Psionic" => 12,
        "Massive" => 13,
        "Structure" => 14,
        "Hover" => 15,
        "Heroic" => 16,
        "User1" => 17,
        "Worker" => 18,
        "RawResource" => 19,
        "HarvestableResource" => 20,
        "Missile" => 21,
        "Destructible" => 22,
        "Item" => 23,
        "Uncommandable" => 24,
        "CanHaveEnergy" => 25,
        "CanHaveShields" => 26,
        "PreventDefeat" => 27,
        "PreventReveal" => 28,
        "Buried" => 29,
        "Cloaked" => 30,
        "Visible" => 31,
        "Stasis" => 32,
        "UnderConstruction" => 33,
        "Dead" => 34,
        "Revivable" => 35,
        "Hidden" => 36,
        "Hallucination" => 37,
        "Invulnerable" => 38,
        "HasEnergy" => 39,
        "HasShields" => 40,
        "Benign" => 41,
        "Passive" => 42,
        "Detector" => 43,
        "Radar" => 44,
        "Stunned" => 45,
        "Summoned" => 46,
        "Unstoppable" => 47,
        "Outer" => 48,
        "Resistant" => 49,
        "Silenced" => 50,
        "Dazed" => 51,
        "MapBoss" => 52,
        "Decaying" => 53,
        "Raisable" => 54,
        "HeroUnit" => 55,
        "NonBuildingUnit" => 56,
        "GroundUnit" => 57,
        "AirUnit" => 58,
        "Powerup" => 59,
        "PowerupOrItem" => 60,
        "NeutralHostile" => 61,
        _ => return None,
    };
    Some(bit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_remapping() {
        assert_eq!(remap_type("gamelink"), "string");
        assert_eq!(remap_type("difficulty"), "int");
        assert_eq!(remap_type("unit"), "unit");
    }

    #[test]
    fn default_returns() {
        assert_eq!(default_return_value("bool"), Some("true"));
        assert_eq!(default_return_value("int"), Some("0"));
        assert_eq!(default_return_value("string"), Some("null"));
        assert_eq!(default_return_value("fixed"), None);
    }

    #[test]
    fn filter_bits_cover_both_halves() {
        assert_eq!(target_filter_bit("Self"), Some(0));
        assert_eq!(target_filter_bit("Visible"), Some(31));
        assert_eq!(target_filter_bit("Stasis"), Some(32));
        assert_eq!(target_filter_bit("NeutralHostile"), Some(61));
        assert_eq!(target_filter_bit("Bogus"), None);
    }
}
