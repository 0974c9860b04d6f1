use serde::{Deserialize, Serialize};

/// High-level geographic classification, drawn from a closed controlled
/// vocabulary. Changing this set is a breaking change (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Theater {
    /// Europe.
    Europe,
    /// Middle East.
    Mideast,
    /// The Americas.
    Americas,
    /// Asia-Pacific.
    AsiaPac,
    /// Africa.
    Africa,
    /// No single-region theater applies.
    Global,
}

impl Theater {
    /// All vocabulary members, in the closed vocabulary's canonical order.
    pub const ALL: [Theater; 6] = [
        Theater::Europe,
        Theater::Mideast,
        Theater::Americas,
        Theater::AsiaPac,
        Theater::Africa,
        Theater::Global,
    ];

    /// Fallback value used when a Reduce response names an unrecognized theater.
    pub const FALLBACK: Theater = Theater::Global;

    /// Parse from the wire representation the LLM is asked to emit
    /// (upper-snake-case identifiers matching the prompt's vocabulary list).
    pub fn parse_vocab(s: &str) -> Option<Theater> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// The wire representation of this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Theater::Europe => "EUROPE",
            Theater::Mideast => "MIDEAST",
            Theater::Americas => "AMERICAS",
            Theater::AsiaPac => "ASIA_PAC",
            Theater::Africa => "AFRICA",
            Theater::Global => "GLOBAL",
        }
    }
}

/// High-level topical classification, drawn from a closed controlled
/// vocabulary. Changing this set is a breaking change (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Diplomatic activity.
    Diplomacy,
    /// Military operations.
    MilitaryOp,
    /// Economic policy.
    EconomicPolicy,
    /// Domestic politics.
    DomesticPolitics,
    /// Technology regulation.
    TechReg,
    /// Energy.
    Energy,
    /// Cyber activity.
    Cyber,
    /// Doesn't fit any other category.
    Other,
}

impl EventType {
    /// All vocabulary members, in the closed vocabulary's canonical order.
    pub const ALL: [EventType; 8] = [
        EventType::Diplomacy,
        EventType::MilitaryOp,
        EventType::EconomicPolicy,
        EventType::DomesticPolitics,
        EventType::TechReg,
        EventType::Energy,
        EventType::Cyber,
        EventType::Other,
    ];

    /// Fallback value used when a Reduce response names an unrecognized event type.
    pub const FALLBACK: EventType = EventType::Other;

    /// Parse from the wire representation the LLM is asked to emit.
    pub fn parse_vocab(s: &str) -> Option<EventType> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// The wire representation of this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Diplomacy => "DIPLOMACY",
            EventType::MilitaryOp => "MILITARY_OP",
            EventType::EconomicPolicy => "ECONOMIC_POLICY",
            EventType::DomesticPolitics => "DOMESTIC_POLITICS",
            EventType::TechReg => "TECH_REG",
            EventType::Energy => "ENERGY",
            EventType::Cyber => "CYBER",
            EventType::Other => "OTHER",
        }
    }
}
