//! Gateway intents bitflags
//!
//! Intents select which event groups the gateway delivers to a shard.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// Gateway intent flags sent with Identify
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        const GUILDS                        = 1 << 0;
        /// Privileged
        const GUILD_MEMBERS                 = 1 << 1;
        const GUILD_MODERATION              = 1 << 2;
        const GUILD_EXPRESSIONS             = 1 << 3;
        const GUILD_INTEGRATIONS            = 1 << 4;
        const GUILD_WEBHOOKS                = 1 << 5;
        const GUILD_INVITES                 = 1 << 6;
        const GUILD_VOICE_STATES            = 1 << 7;
        /// Privileged
        const GUILD_PRESENCES               = 1 << 8;
        const GUILD_MESSAGES                = 1 << 9;
        const GUILD_MESSAGE_REACTIONS       = 1 << 10;
        const GUILD_MESSAGE_TYPING          = 1 << 11;
        const DIRECT_MESSAGES               = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS      = 1 << 13;
        const DIRECT_MESSAGE_TYPING         = 1 << 14;
        /// Privileged
        const MESSAGE_CONTENT               = 1 << 15;
        const GUILD_SCHEDULED_EVENTS        = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION     = 1 << 21;

        /// Intents that require explicit approval for large applications
        const PRIVILEGED = Self::GUILD_MEMBERS.bits()
            | Self::GUILD_PRESENCES.bits()
            | Self::MESSAGE_CONTENT.bits();
    }
}

/// Result of resolving a list of intent names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIntents {
    pub intents: Intents,
    /// Names that did not match any known intent
    pub unknown: Vec<String>,
}

impl Intents {
    /// Everything except the privileged intents
    pub const UNPRIVILEGED: Self = Self::from_bits_truncate(
        Self::GUILDS.bits()
            | Self::GUILD_MODERATION.bits()
            | Self::GUILD_EXPRESSIONS.bits()
            | Self::GUILD_INTEGRATIONS.bits()
            | Self::GUILD_WEBHOOKS.bits()
            | Self::GUILD_INVITES.bits()
            | Self::GUILD_VOICE_STATES.bits()
            | Self::GUILD_MESSAGES.bits()
            | Self::GUILD_MESSAGE_REACTIONS.bits()
            | Self::GUILD_MESSAGE_TYPING.bits()
            | Self::DIRECT_MESSAGES.bits()
            | Self::DIRECT_MESSAGE_REACTIONS.bits()
            | Self::DIRECT_MESSAGE_TYPING.bits()
            | Self::GUILD_SCHEDULED_EVENTS.bits()
            | Self::AUTO_MODERATION_CONFIGURATION.bits()
            | Self::AUTO_MODERATION_EXECUTION.bits(),
    );

    /// Resolve intent names into flags.
    ///
    /// Accepts `GUILD_MESSAGES`, `guild_messages` and `guildMessages`, and
    /// decimal bit masks. Unrecognised names are collected rather than rejected
    /// so the caller can warn about them. Only the named intents are set.
    pub fn from_names<I, S>(names: I) -> ParsedIntents
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = ParsedIntents {
            intents: Intents::empty(),
            unknown: Vec::new(),
        };

        for raw in names {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }

            if let Ok(bits) = raw.parse::<u64>() {
                parsed.intents |= Intents::from_bits_truncate(bits);
                continue;
            }

            match Intents::from_name(&normalize_name(raw)) {
                Some(intent) => parsed.intents |= intent,
                None => parsed.unknown.push(raw.to_string()),
            }
        }

        parsed
    }

    /// Whether any privileged intent is requested
    #[inline]
    pub fn is_privileged(&self) -> bool {
        self.intersects(Intents::PRIVILEGED)
    }
}

/// `guildMessages` / `guild_messages` -> `GUILD_MESSAGES`
fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for ch in raw.chars() {
        if ch.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        out.push(ch.to_ascii_uppercase());
    }
    out
}

impl Default for Intents {
    fn default() -> Self {
        Intents::GUILDS | Intents::GUILD_MESSAGES
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

// Identify carries intents as a plain integer
impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Intents::from_bits_truncate)
    }
}

impl From<u64> for Intents {
    fn from(bits: u64) -> Self {
        Intents::from_bits_truncate(bits)
    }
}
