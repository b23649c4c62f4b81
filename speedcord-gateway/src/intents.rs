//! Gateway intent bitflags, sent as part of IDENTIFY.

use bitflags::bitflags;

bitflags! {
    /// Which categories of event a shard's IDENTIFY subscribes to.
    ///
    /// Bit values are fixed by Discord's gateway protocol, not by this
    /// crate; see <https://discord.com/developers/docs/topics/gateway#gateway-intents>.
    #[derive(Default)]
    pub struct Intents: u32 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_BANS = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
    }
}

impl Intents {
    /// The raw intent bits, as sent in the IDENTIFY payload's `intents` field.
    pub const fn bits_as_i64(self) -> i64 {
        self.bits() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_via_bitor() {
        let intents = Intents::GUILDS | Intents::GUILD_MESSAGES;
        assert!(intents.contains(Intents::GUILDS));
        assert!(intents.contains(Intents::GUILD_MESSAGES));
        assert!(!intents.contains(Intents::GUILD_PRESENCES));
    }
}
