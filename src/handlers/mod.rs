//! Command handlers.
//!
//! Each handler is a plain function running to completion on the engine
//! task; the table entries carry the dispatch metadata (minimum parameters,
//! flood penalty, pre-registration allowance, oper gate).

pub mod cap;
pub mod channel;
pub mod connection;
pub mod messaging;
pub mod misc;
pub mod mode;
pub mod oper;
pub mod xlines;

use crate::dispatch::{CommandDef, CommandTable};

/// Build the full command table.
pub fn build_table() -> CommandTable {
    let mut table = CommandTable::new();

    // Registration and liveness; the restricted pre-registration set.
    table.register(CommandDef::new("CAP", 1, cap::handle_cap).pre_reg());
    table.register(CommandDef::new("PASS", 1, connection::handle_pass).pre_reg());
    table.register(CommandDef::new("NICK", 0, connection::handle_nick).pre_reg());
    table.register(CommandDef::new("USER", 4, connection::handle_user).pre_reg());
    table.register(CommandDef::new("PING", 1, connection::handle_ping).pre_reg());
    table.register(
        CommandDef::new("PONG", 0, connection::handle_pong)
            .pre_reg()
            .penalty(0),
    );
    table.register(CommandDef::new("QUIT", 0, connection::handle_quit).pre_reg());

    // Channels.
    table.register(CommandDef::new("JOIN", 1, channel::handle_join));
    table.register(CommandDef::new("PART", 1, channel::handle_part));
    table.register(CommandDef::new("KICK", 2, channel::handle_kick));
    table.register(CommandDef::new("TOPIC", 1, channel::handle_topic));
    table.register(CommandDef::new("NAMES", 0, channel::handle_names));
    table.register(CommandDef::new("INVITE", 2, channel::handle_invite));
    table.register(CommandDef::new("LIST", 0, channel::handle_list).penalty(2_000));

    // Messaging.
    table.register(CommandDef::new("PRIVMSG", 1, messaging::handle_privmsg));
    table.register(CommandDef::new("NOTICE", 1, messaging::handle_notice));

    // Modes.
    table.register(CommandDef::new("MODE", 1, mode::handle_mode));

    // Presence and server queries.
    table.register(CommandDef::new("AWAY", 0, misc::handle_away));
    table.register(CommandDef::new("MOTD", 0, misc::handle_motd));
    table.register(CommandDef::new("LUSERS", 0, misc::handle_lusers));
    table.register(CommandDef::new("XINFO", 1, misc::handle_xinfo));

    // Operators.
    table.register(CommandDef::new("OPER", 2, oper::handle_oper));
    table.register(
        CommandDef::new("REHASH", 0, oper::handle_rehash)
            .oper_only()
            .penalty(2_000),
    );

    // X-lines.
    table.register(CommandDef::new("KLINE", 1, xlines::handle_kline).oper_only());
    table.register(CommandDef::new("GLINE", 1, xlines::handle_gline).oper_only());
    table.register(CommandDef::new("ZLINE", 1, xlines::handle_zline).oper_only());
    table.register(CommandDef::new("QLINE", 1, xlines::handle_qline).oper_only());
    table.register(CommandDef::new("RLINE", 1, xlines::handle_rline).oper_only());
    table.register(CommandDef::new("CBAN", 1, xlines::handle_cban).oper_only());

    table
}
