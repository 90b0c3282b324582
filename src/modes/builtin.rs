//! The built-in mode set.

use super::{ModeDef, ModeKind, ModeRegistry, RANK_ADMIN, RANK_FOUNDER, RANK_HALFOP, RANK_OP, RANK_VOICE};

fn check_key(adding: bool, param: &str) -> Result<String, String> {
    if !adding {
        return Ok(param.to_string());
    }
    if param.is_empty() || param.contains(' ') || param.contains(',') {
        return Err("invalid channel key".to_string());
    }
    // Keys longer than 32 are truncated rather than refused.
    Ok(param.chars().take(32).collect())
}

fn check_limit(adding: bool, param: &str) -> Result<String, String> {
    if !adding {
        return Ok(param.to_string());
    }
    match param.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n.to_string()),
        _ => Err("limit must be a positive number".to_string()),
    }
}

/// Install the built-in channel and user modes into `registry`.
pub fn install_builtin_modes(registry: &mut ModeRegistry) {
    // Channel simple modes.
    for (name, letter) in [
        ("inviteonly", 'i'),
        ("moderated", 'm'),
        ("noextmsg", 'n'),
        ("private", 'p'),
        ("secret", 's'),
        ("topiclock", 't'),
        ("regonly", 'r'),
        ("sslonly", 'S'),
    ] {
        registry.register_channel_mode(ModeDef {
            name,
            letter,
            kind: ModeKind::Simple,
            set_rank: RANK_OP,
            oper_only: false,
            param_check: None,
        });
    }

    // Permanent channels are an operator concern.
    registry.register_channel_mode(ModeDef {
        name: "permanent",
        letter: 'P',
        kind: ModeKind::Simple,
        set_rank: RANK_OP,
        oper_only: true,
        param_check: None,
    });

    // Parameter modes.
    registry.register_channel_mode(ModeDef {
        name: "key",
        letter: 'k',
        kind: ModeKind::Param { secret: true },
        set_rank: RANK_OP,
        oper_only: false,
        param_check: Some(check_key),
    });
    registry.register_channel_mode(ModeDef {
        name: "limit",
        letter: 'l',
        kind: ModeKind::Param { secret: false },
        set_rank: RANK_OP,
        oper_only: false,
        param_check: Some(check_limit),
    });

    // Prefix modes.
    for (name, letter, prefix, rank, set_rank) in [
        ("voice", 'v', '+', RANK_VOICE, RANK_HALFOP),
        ("halfop", 'h', '%', RANK_HALFOP, RANK_OP),
        ("op", 'o', '@', RANK_OP, RANK_OP),
        ("admin", 'a', '&', RANK_ADMIN, RANK_FOUNDER),
        ("founder", 'q', '~', RANK_FOUNDER, RANK_FOUNDER),
    ] {
        registry.register_channel_mode(ModeDef {
            name,
            letter,
            kind: ModeKind::Prefix { prefix, rank },
            set_rank,
            oper_only: false,
            param_check: None,
        });
    }

    // List modes. Halfops manage the ban list.
    for (name, letter) in [("ban", 'b'), ("banexception", 'e'), ("invex", 'I')] {
        registry.register_channel_mode(ModeDef {
            name,
            letter,
            kind: ModeKind::List,
            set_rank: RANK_HALFOP,
            oper_only: false,
            param_check: None,
        });
    }

    // User modes.
    for (name, letter, oper_only) in [
        ("invisible", 'i', false),
        ("wallops", 'w', false),
        ("oper", 'o', false),
        ("snomask", 's', true),
    ] {
        registry.register_user_mode(ModeDef {
            name,
            letter,
            kind: ModeKind::Simple,
            set_rank: 0,
            oper_only,
            param_check: None,
        });
    }
}
