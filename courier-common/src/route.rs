use std::fmt;

use thiserror::Error;

/// The exchange every known route lives on
pub const MAIL_EXCHANGE: &str = "mail";

/// The closed set of (exchange, routing key) pairs the backbone understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Mail accepted by an ingestion session, awaiting inbox dispatch
    Received,
    /// Outbound mail awaiting delivery
    Send,
    /// Outbound mail whose previous delivery attempt left recipients behind
    SendRetry,
}

impl Route {
    pub const ALL: [Self; 3] = [Self::Received, Self::Send, Self::SendRetry];

    /// Resolves a delivered envelope's exchange and routing key.
    ///
    /// An empty exchange is accepted for messages redelivered through the
    /// default exchange; anything else must be [`MAIL_EXCHANGE`].
    pub fn resolve(exchange: &str, routing_key: &str) -> Option<Self> {
        if !exchange.is_empty() && exchange != MAIL_EXCHANGE {
            return None;
        }

        Self::ALL
            .into_iter()
            .find(|route| route.routing_key() == routing_key)
    }

    pub const fn exchange(self) -> &'static str {
        MAIL_EXCHANGE
    }

    pub const fn routing_key(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Send => "sent",
            Self::SendRetry => "send_retry",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange(), self.routing_key())
    }
}

/// An (exchange, routing key) pair something is published to or delivered from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub exchange: String,
    pub routing_key: String,
}

impl Address {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    /// An empty exchange matches any, for redeliveries through the default
    /// exchange
    fn matches(&self, exchange: &str, routing_key: &str) -> bool {
        (exchange.is_empty() || self.exchange == exchange) && self.routing_key == routing_key
    }
}

impl From<Route> for Address {
    fn from(route: Route) -> Self {
        Self::new(route.exchange(), route.routing_key())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.routing_key)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{address} is already routed as {claimed:?}, not {requested:?}")]
pub struct RouteConflict {
    pub address: Address,
    pub claimed: Route,
    pub requested: Route,
}

/// The route table for a deployment, fixed at startup.
///
/// Each route has one address it is published to. Further addresses can be
/// recognised as a route on delivery, such as the key the retry queue
/// dead-letters back under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    /// Publish addresses, in [`Route::ALL`] order
    publish: [Address; 3],
    aliases: Vec<(Address, Route)>,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            publish: Route::ALL.map(Address::from),
            aliases: Vec::new(),
        }
    }
}

impl Routes {
    const fn index(route: Route) -> usize {
        match route {
            Route::Received => 0,
            Route::Send => 1,
            Route::SendRetry => 2,
        }
    }

    /// Where envelopes on `route` are published
    pub const fn address(&self, route: Route) -> &Address {
        &self.publish[Self::index(route)]
    }

    /// Publishes `route` to `address` instead of its default
    pub fn publish_to(mut self, route: Route, address: Address) -> Result<Self, RouteConflict> {
        self.check(&address, route)?;
        self.publish[Self::index(route)] = address;
        Ok(self)
    }

    /// Also resolves deliveries from `address` as `route`
    pub fn alias(mut self, address: Address, route: Route) -> Result<Self, RouteConflict> {
        self.check(&address, route)?;
        if self.resolve(&address.exchange, &address.routing_key) != Some(route) {
            self.aliases.push((address, route));
        }
        Ok(self)
    }

    /// Resolves a delivered envelope's exchange and routing key
    pub fn resolve(&self, exchange: &str, routing_key: &str) -> Option<Route> {
        Route::ALL
            .into_iter()
            .zip(&self.publish)
            .map(|(route, address)| (address, route))
            .chain(self.aliases.iter().map(|(address, route)| (address, *route)))
            .find(|(address, _)| address.matches(exchange, routing_key))
            .map(|(_, route)| route)
    }

    fn check(&self, address: &Address, requested: Route) -> Result<(), RouteConflict> {
        match self.resolve(&address.exchange, &address.routing_key) {
            Some(claimed) if claimed != requested => Err(RouteConflict {
                address: address.clone(),
                claimed,
                requested,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn resolves_known_pairs() {
        assert_eq!(Route::resolve("mail", "received"), Some(Route::Received));
        assert_eq!(Route::resolve("mail", "sent"), Some(Route::Send));
        assert_eq!(Route::resolve("mail", "send_retry"), Some(Route::SendRetry));
        assert_eq!(Route::resolve("", "sent"), Some(Route::Send));
    }

    #[test]
    fn unknown_pairs_do_not_resolve() {
        assert_eq!(Route::resolve("mail", "bounced"), None);
        assert_eq!(Route::resolve("billing", "sent"), None);
    }

    #[test]
    fn display_is_exchange_and_key() {
        assert_eq!(Route::SendRetry.to_string(), "mail:send_retry");
    }

    #[test]
    fn default_table_matches_the_fixed_routes() {
        let routes = Routes::default();

        for route in Route::ALL {
            assert_eq!(routes.resolve("mail", route.routing_key()), Some(route));
            assert_eq!(routes.address(route).to_string(), route.to_string());
        }
        assert_eq!(routes.resolve("", "sent"), Some(Route::Send));
        assert_eq!(routes.resolve("billing", "sent"), None);
    }

    #[test]
    fn retry_route_follows_its_configured_address() {
        let routes = Routes::default()
            .publish_to(Route::SendRetry, Address::new("delays", "delayed"))
            .unwrap()
            .alias(Address::new("delays", "retried"), Route::Send)
            .unwrap();

        assert_eq!(routes.address(Route::SendRetry), &Address::new("delays", "delayed"));
        assert_eq!(routes.resolve("delays", "delayed"), Some(Route::SendRetry));
        assert_eq!(routes.resolve("delays", "retried"), Some(Route::Send));
        assert_eq!(routes.resolve("mail", "sent"), Some(Route::Send));
        assert_eq!(routes.resolve("mail", "send_retry"), None);
        // Publishing still targets the primary address
        assert_eq!(routes.address(Route::Send), &Address::from(Route::Send));
    }

    #[test]
    fn an_address_cannot_serve_two_routes() {
        let err = Routes::default()
            .alias(Address::new("mail", "received"), Route::Send)
            .unwrap_err();

        assert_eq!(err.claimed, Route::Received);
        assert_eq!(err.requested, Route::Send);
        assert_eq!(err.to_string(), "mail:received is already routed as Received, not Send");

        assert!(
            Routes::default()
                .publish_to(Route::SendRetry, Address::new("mail", "sent"))
                .is_err()
        );
    }

    #[test]
    fn aliasing_an_existing_address_is_a_no_op() {
        let routes = Routes::default()
            .alias(Address::new("mail", "sent"), Route::Send)
            .unwrap();

        assert_eq!(routes, Routes::default());
    }
}
