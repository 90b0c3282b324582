//! IRC numeric replies.
//!
//! Numerics are built from a code and an ordered parameter list; the first
//! parameter is always the recipient's nick (or `*` before registration) and
//! is supplied when the builder is turned into a [`Message`]. Handlers never
//! assemble numeric text by hand.
//!
//! # Reference
//! - RFC 1459 / RFC 2812 reply numbers
//! - Modern IRC documentation: <https://modern.ircdocs.horse/>

#![allow(non_camel_case_types)]

use crate::message::Message;

/// IRC numeric reply codes.
///
/// The set here covers what the daemon emits plus nearby numerics that
/// belong to the same reply families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum Numeric {
    // === Connection registration (001-099) ===
    RPL_WELCOME = 1,
    RPL_YOURHOST = 2,
    RPL_CREATED = 3,
    RPL_MYINFO = 4,
    RPL_ISUPPORT = 5,
    RPL_YOURUUID = 42,

    // === Command replies (200-399) ===
    RPL_UMODEIS = 221,
    RPL_LUSERCLIENT = 251,
    RPL_LUSEROP = 252,
    RPL_LUSERUNKNOWN = 253,
    RPL_LUSERCHANNELS = 254,
    RPL_LUSERME = 255,
    RPL_AWAY = 301,
    RPL_UNAWAY = 305,
    RPL_NOWAWAY = 306,
    RPL_WHOISREGNICK = 307,
    RPL_ENDOFWHO = 315,
    RPL_LISTSTART = 321,
    RPL_LIST = 322,
    RPL_LISTEND = 323,
    RPL_CHANNELMODEIS = 324,
    RPL_CREATIONTIME = 329,
    RPL_NOTOPIC = 331,
    RPL_TOPIC = 332,
    RPL_TOPICWHOTIME = 333,
    RPL_INVITING = 341,
    RPL_INVITELIST = 346,
    RPL_ENDOFINVITELIST = 347,
    RPL_EXCEPTLIST = 348,
    RPL_ENDOFEXCEPTLIST = 349,
    RPL_NAMREPLY = 353,
    RPL_ENDOFNAMES = 366,
    RPL_BANLIST = 367,
    RPL_ENDOFBANLIST = 368,
    RPL_MOTD = 372,
    RPL_MOTDSTART = 375,
    RPL_ENDOFMOTD = 376,
    RPL_YOUREOPER = 381,

    // === Error replies (400-599) ===
    ERR_NOSUCHNICK = 401,
    ERR_NOSUCHSERVER = 402,
    ERR_NOSUCHCHANNEL = 403,
    ERR_CANNOTSENDTOCHAN = 404,
    ERR_TOOMANYCHANNELS = 405,
    ERR_INVALIDCAPCMD = 410,
    ERR_NOTEXTTOSEND = 412,
    ERR_INPUTTOOLONG = 417,
    ERR_UNKNOWNCOMMAND = 421,
    ERR_NOMOTD = 422,
    ERR_NONICKNAMEGIVEN = 431,
    ERR_ERRONEUSNICKNAME = 432,
    ERR_NICKNAMEINUSE = 433,
    ERR_USERNOTINCHANNEL = 441,
    ERR_NOTONCHANNEL = 442,
    ERR_USERONCHANNEL = 443,
    ERR_NOTREGISTERED = 451,
    ERR_NEEDMOREPARAMS = 461,
    ERR_ALREADYREGISTERED = 462,
    ERR_PASSWDMISMATCH = 464,
    ERR_CHANNELISFULL = 471,
    ERR_UNKNOWNMODE = 472,
    ERR_INVITEONLYCHAN = 473,
    ERR_BANNEDFROMCHAN = 474,
    ERR_BADCHANNELKEY = 475,
    ERR_NEEDREGGEDNICK = 477,
    ERR_BANLISTFULL = 478,
    ERR_NOPRIVILEGES = 481,
    ERR_CHANOPRIVSNEEDED = 482,
    ERR_SECUREONLYCHAN = 489,
    ERR_NOOPERHOST = 491,
    ERR_UMODEUNKNOWNFLAG = 501,
    ERR_USERSDONTMATCH = 502,
    ERR_TOOMANYWATCH = 512,

    // === Extended numerics (600-999) ===
    ERR_INVALIDMODEPARAM = 696,
    ERR_NOSUCHXINFO = 772,
    RPL_XINFOENTRY = 773,
    RPL_XINFOEND = 774,
    RPL_XINFOTYPE = 775,
}

impl Numeric {
    /// The numeric code.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// The three-digit command form used on the wire.
    pub fn as_command(self) -> String {
        format!("{:03}", self.code())
    }

    /// Start building a reply with this code.
    pub fn build(self) -> NumericBuilder {
        NumericBuilder {
            numeric: self,
            params: Vec::new(),
            trailing: false,
        }
    }
}

/// Accumulates the parameters of a numeric reply.
#[derive(Clone, Debug)]
pub struct NumericBuilder {
    numeric: Numeric,
    params: Vec<String>,
    trailing: bool,
}

impl NumericBuilder {
    /// Append a middle parameter.
    #[must_use]
    pub fn param(mut self, p: impl Into<String>) -> Self {
        self.params.push(p.into());
        self
    }

    /// Append the final parameter in trailing form.
    #[must_use]
    pub fn trailing(mut self, p: impl Into<String>) -> Self {
        self.params.push(p.into());
        self.trailing = true;
        self
    }

    /// Finish: the reply is from `server`, addressed to `target` (a nick, or
    /// `*` for unregistered connections).
    pub fn message(self, server: &str, target: &str) -> Message {
        let mut msg = Message::cmd(self.numeric.as_command())
            .with_source(server)
            .param(target);
        msg.params.extend(self.params);
        msg.trailing = self.trailing;
        msg
    }
}
