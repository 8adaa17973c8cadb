use core::fmt::{self, Display, Formatter};

use mailparse::MailAddr;

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl HeloVariant {
    pub fn id(&self) -> &str {
        match self {
            Self::Ehlo(id) | Self::Helo(id) => id,
        }
    }
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// `AUTH <mechanism> [initial-response]`
    Auth {
        mechanism: String,
        initial: Option<String>,
    },
    /// A continuation line sent after a `334` challenge. Never parsed from a
    /// command line; the session builds it while authentication is pending.
    AuthResponse(String),
    /// `None` is the null reverse-path `<>`. The second field is a declared
    /// `SIZE=` parameter, if any.
    MailFrom(Option<String>, Option<usize>),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
    /// Recognised, but not offered by this server
    Unsupported(String),
    Invalid(String),
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(variant) => write!(fmt, "{variant} {}", variant.id()),
            Self::Auth { mechanism, .. } => write!(fmt, "AUTH {mechanism}"),
            // Credentials are never echoed into logs
            Self::AuthResponse(_) => fmt.write_str("<auth response>"),
            Self::MailFrom(sender, _) => {
                write!(fmt, "MAIL FROM:<{}>", sender.as_deref().unwrap_or_default())
            }
            Self::RcptTo(rcpt) => write!(fmt, "RCPT TO:<{rcpt}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::Unsupported(command) | Self::Invalid(command) => fmt.write_str(command),
        }
    }
}

/// Parses a path such as `<user@example.com>` into a single bare address
fn parse_path(path: &str) -> Result<String, String> {
    let addresses = mailparse::addrparse(path).map_err(|err| err.to_string())?;

    match addresses.iter().next() {
        Some(MailAddr::Single(single)) if addresses.len() == 1 => Ok(single.addr.clone()),
        _ => Err(format!("Expected a single address in {path}")),
    }
}

fn parse_mail_from(rest: &str) -> Result<Command, Command> {
    let rest = rest.trim();
    let (path, params) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));

    let mut size = None;
    for param in params.split_whitespace() {
        if let Some((key, value)) = param.split_once('=')
            && key.eq_ignore_ascii_case("SIZE")
        {
            size = Some(
                value
                    .parse::<usize>()
                    .map_err(|_| Command::Invalid(format!("Invalid SIZE value: {value}")))?,
            );
        }
    }

    if path == "<>" {
        return Ok(Command::MailFrom(None, size));
    }

    if path.is_empty() {
        return Err(Command::Invalid("MAIL FROM requires a path".to_string()));
    }

    parse_path(path)
        .map(|sender| Command::MailFrom(Some(sender), size))
        .map_err(Command::Invalid)
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &line[prefix.len()..])
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "MAIL FROM:") {
            return parse_mail_from(rest);
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "RCPT TO:") {
            let path = rest.split_whitespace().next().unwrap_or_default();
            if path.is_empty() {
                return Err(Self::Invalid("RCPT TO requires a path".to_string()));
            }
            return parse_path(path).map(Self::RcptTo).map_err(Self::Invalid);
        }

        let (verb, argument) = trimmed
            .split_once(' ')
            .map_or((trimmed, ""), |(verb, argument)| (verb, argument.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" | "HELO" if argument.is_empty() => {
                Err(Self::Invalid(format!("Expected hostname in {trimmed}")))
            }
            "EHLO" => Ok(Self::Helo(HeloVariant::Ehlo(argument.to_string()))),
            "HELO" => Ok(Self::Helo(HeloVariant::Helo(argument.to_string()))),
            "AUTH" => {
                let mut parts = argument.split_whitespace();
                parts.next().map_or_else(
                    || Err(Self::Invalid("AUTH requires a mechanism".to_string())),
                    |mechanism| {
                        Ok(Self::Auth {
                            mechanism: mechanism.to_ascii_uppercase(),
                            initial: parts.next().map(str::to_string),
                        })
                    },
                )
            }
            "DATA" if argument.is_empty() => Ok(Self::Data),
            "RSET" if argument.is_empty() => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" if argument.is_empty() => Ok(Self::Quit),
            "STARTTLS" | "VRFY" | "EXPN" | "HELP" | "TURN" | "ETRN" | "BDAT" => {
                Ok(Self::Unsupported(verb.to_ascii_uppercase()))
            }
            _ => Err(Self::Invalid(trimmed.to_string())),
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}
