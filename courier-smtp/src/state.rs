use core::fmt::{self, Display, Formatter};

use courier_common::status::Status;

use crate::{
    auth::{AuthFailure, MECHANISM},
    command::{Command, HeloVariant},
    reply::Reply,
    session_state::SessionState,
};

/// Sealed trait to prevent external state implementations
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for valid session states
pub trait SmtpState: sealed::Sealed + core::fmt::Debug {}

/// Connected, waiting for `EHLO`/`HELO`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect;

/// Greeted but not yet authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unauthenticated;

/// `AUTH PLAIN` was sent without an initial response; the next line carries
/// the credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPending;

/// Authenticated, no transaction open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticated;

/// `MAIL FROM` accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderSet {
    pub sender: Option<String>,
}

/// At least one `RCPT TO` accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientsCollected {
    pub sender: Option<String>,
    pub recipients: Vec<String>,
}

/// `DATA` accepted; the body is being read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub sender: Option<String>,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

impl sealed::Sealed for Connect {}
impl sealed::Sealed for Unauthenticated {}
impl sealed::Sealed for AuthPending {}
impl sealed::Sealed for Authenticated {}
impl sealed::Sealed for SenderSet {}
impl sealed::Sealed for RecipientsCollected {}
impl sealed::Sealed for Data {}
impl sealed::Sealed for Closed {}

impl SmtpState for Connect {}
impl SmtpState for Unauthenticated {}
impl SmtpState for AuthPending {}
impl SmtpState for Authenticated {}
impl SmtpState for SenderSet {}
impl SmtpState for RecipientsCollected {}
impl SmtpState for Data {}
impl SmtpState for Closed {}

/// Every state a session can be in. Transaction data lives inside the
/// states that need it, so a `DATA` without recipients has nothing to read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Connect,
    Unauthenticated(Unauthenticated),
    AuthPending(AuthPending),
    Authenticated(Authenticated),
    SenderSet(SenderSet),
    RecipientsCollected(RecipientsCollected),
    Data(Data),
    Closed(Closed),
}

impl Display for State {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Connect => "Connect",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::AuthPending(_) => "AuthPending",
            Self::Authenticated(_) => "Authenticated",
            Self::SenderSet(_) => "SenderSet",
            Self::RecipientsCollected(_) => "RecipientsCollected",
            Self::Data(_) => "Data",
            Self::Closed(_) => "Closed",
        })
    }
}

fn auth_required() -> Reply {
    Reply::new(Status::AuthRequired, "Authentication required")
}

fn bad_sequence(message: &'static str) -> Reply {
    Reply::new(Status::InvalidCommandSequence, message)
}

impl State {
    /// The resting state once a transaction ends: credentials survive
    pub(crate) const fn idle(ctx: &SessionState) -> Self {
        if ctx.is_authenticated() {
            Self::Authenticated(Authenticated)
        } else {
            Self::Unauthenticated(Unauthenticated)
        }
    }

    fn greet(variant: &HeloVariant, ctx: &mut SessionState) -> Reply {
        ctx.hostname = variant.id().to_string();
        ctx.extended = matches!(variant, HeloVariant::Ehlo(_));

        if ctx.extended {
            Reply::multi(
                Status::Ok,
                [
                    format!("{} greets {}", ctx.banner, ctx.hostname),
                    format!("AUTH {MECHANISM}"),
                    format!("SIZE {}", ctx.max_message_size),
                    "8BITMIME".to_string(),
                ],
            )
        } else {
            Reply::new(
                Status::Ok,
                format!("{} says hello to {}", ctx.banner, ctx.hostname),
            )
        }
    }

    fn authenticate(response: &str, ctx: &mut SessionState) -> (Self, Reply) {
        if response.trim() == "*" {
            return (
                Self::Unauthenticated(Unauthenticated),
                Reply::new(Status::InvalidParameters, "Authentication cancelled"),
            );
        }

        match ctx.auth.verify(response) {
            Ok(user) => {
                ctx.user = Some(user);
                (
                    Self::Authenticated(Authenticated),
                    Reply::new(Status::AuthSucceeded, "Authentication succeeded"),
                )
            }
            Err(AuthFailure::Malformed) => (
                Self::Unauthenticated(Unauthenticated),
                Reply::new(Status::InvalidParameters, "Malformed authentication response"),
            ),
            Err(AuthFailure::Rejected) => (
                Self::Unauthenticated(Unauthenticated),
                Reply::new(Status::AuthFailed, "Invalid credentials"),
            ),
        }
    }

    /// Applies `command` to the current state, returning the next state and
    /// the reply to send.
    #[allow(clippy::too_many_lines)]
    pub fn transition_protocol(self, command: Command, ctx: &mut SessionState) -> (Self, Reply) {
        match (self, command) {
            (Self::Closed(closed), _) => (
                Self::Closed(closed),
                Reply::new(Status::Unavailable, "Session closed").closing(),
            ),

            (_, Command::Quit) => (
                Self::Closed(Closed),
                Reply::new(Status::GoodBye, "Bye").closing(),
            ),

            // Any line while a challenge is outstanding is the answer to it
            (Self::AuthPending(_), Command::AuthResponse(response)) => {
                Self::authenticate(&response, ctx)
            }
            (Self::AuthPending(_), _) => (
                Self::Unauthenticated(Unauthenticated),
                Reply::new(Status::InvalidParameters, "Malformed authentication response"),
            ),

            (state, Command::Noop) => (state, Reply::new(Status::Ok, "OK")),

            // A greeting aborts any open transaction
            (_, Command::Helo(variant)) => {
                let reply = Self::greet(&variant, ctx);
                (Self::idle(ctx), reply)
            }

            (Self::Connect, Command::Rset) => (Self::Connect, Reply::new(Status::Ok, "OK")),
            (_, Command::Rset) => (Self::idle(ctx), Reply::new(Status::Ok, "OK")),

            (state, Command::Unsupported(verb)) => (
                state,
                Reply::new(
                    Status::NotImplemented,
                    format!("{verb} is not implemented"),
                ),
            ),
            (state, Command::Invalid(reason)) => (
                state,
                Reply::new(Status::SyntaxError, format!("Syntax error: {reason}")),
            ),

            (Self::Connect, _) => (Self::Connect, bad_sequence("Send EHLO or HELO first")),

            (Self::Unauthenticated(_), Command::Auth { mechanism, initial }) => {
                if mechanism != MECHANISM {
                    return (
                        Self::Unauthenticated(Unauthenticated),
                        Reply::new(
                            Status::ParameterNotImplemented,
                            "Unrecognized authentication type",
                        ),
                    );
                }

                match initial {
                    // `=` is an empty initial response
                    Some(response) if response != "=" => Self::authenticate(&response, ctx),
                    _ => (
                        Self::AuthPending(AuthPending),
                        Reply::new(Status::AuthContinue, ""),
                    ),
                }
            }
            (state, Command::Auth { .. }) => (state, bad_sequence("Already authenticated")),

            (
                Self::Unauthenticated(_),
                Command::MailFrom(..) | Command::RcptTo(_) | Command::Data,
            ) => (Self::Unauthenticated(Unauthenticated), auth_required()),

            (Self::Authenticated(_), Command::MailFrom(_, Some(size)))
                if size > ctx.max_message_size =>
            {
                (
                    Self::Authenticated(Authenticated),
                    Reply::new(
                        Status::ExceededStorage,
                        format!(
                            "Declared size {size} exceeds the maximum of {} bytes",
                            ctx.max_message_size
                        ),
                    ),
                )
            }
            (Self::Authenticated(_), Command::MailFrom(sender, _)) => {
                (Self::SenderSet(SenderSet { sender }), Reply::new(Status::Ok, "OK"))
            }
            (state @ (Self::SenderSet(_) | Self::RecipientsCollected(_)), Command::MailFrom(..)) => {
                (state, bad_sequence("Sender already specified"))
            }

            (Self::Authenticated(_), Command::RcptTo(_)) => (
                Self::Authenticated(Authenticated),
                bad_sequence("Need MAIL before RCPT"),
            ),
            (Self::SenderSet(SenderSet { sender }), Command::RcptTo(recipient)) => (
                Self::RecipientsCollected(RecipientsCollected {
                    sender,
                    recipients: vec![recipient],
                }),
                Reply::new(Status::Ok, "OK"),
            ),
            (Self::RecipientsCollected(mut collected), Command::RcptTo(recipient)) => {
                if collected.recipients.len() >= ctx.max_recipients {
                    return (
                        Self::Closed(Closed),
                        Reply::new(
                            Status::InsufficientStorage,
                            format!("Too many recipients (limit {})", ctx.max_recipients),
                        )
                        .closing(),
                    );
                }

                collected.recipients.push(recipient);
                (Self::RecipientsCollected(collected), Reply::new(Status::Ok, "OK"))
            }

            (Self::Authenticated(_), Command::Data) => (
                Self::Authenticated(Authenticated),
                bad_sequence("Need MAIL before DATA"),
            ),
            (Self::SenderSet(state), Command::Data) => (
                Self::SenderSet(state),
                Reply::new(Status::TransactionFailed, "No valid recipients"),
            ),
            (Self::RecipientsCollected(RecipientsCollected { sender, recipients }), Command::Data) => (
                Self::Data(Data { sender, recipients }),
                Reply::new(
                    Status::StartMailInput,
                    "Start mail input; end with <CRLF>.<CRLF>",
                ),
            ),

            (state, command) => {
                let reason = format!("{command} is not valid in {state}");
                (
                    state,
                    Reply::new(Status::InvalidCommandSequence, reason),
                )
            }
        }
    }

    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}
