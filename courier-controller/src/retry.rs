//! Successor envelopes for deliveries that left recipients behind.

use std::time::Duration;

use courier_common::{
    Envelope, Route, Routes,
    envelope::{DELAY, RECIPIENTS, RETRY_COUNT, SEND_MAIL_ID},
};

/// Everything needed to schedule the next attempt of a send task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPlan {
    pub send_mail_id: String,
    /// The count the successor carries: retries performed including this one
    pub retry_count: u32,
    pub delay: Duration,
    pub recipients: Vec<String>,
}

impl RetryPlan {
    /// Builds the successor of `original`, addressed to the retry route in
    /// `routes`.
    ///
    /// The body is carried over untouched. The delay is both a header and
    /// the per-message expiration, so the retry queue holds the envelope
    /// for exactly that long before dead-lettering it back.
    pub fn envelope(&self, original: &Envelope, routes: &Routes) -> Envelope {
        let delay_millis = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX);
        let address = routes.address(Route::SendRetry);

        let mut envelope = Envelope::new(
            address.exchange.as_str(),
            address.routing_key.as_str(),
            original.body.clone(),
        )
        .with_header(RETRY_COUNT, self.retry_count)
        .with_header(DELAY, delay_millis)
        .with_header(RECIPIENTS, self.recipients.join(","))
        .with_header(SEND_MAIL_ID, self.send_mail_id.as_str())
        .with_expiration(self.delay);
        envelope.content_type.clone_from(&original.content_type);

        envelope
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use courier_common::{Address, RetryCount};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn successor_carries_count_delay_and_recipients() {
        let original = Envelope::new("mail", "sent", b"{\"send_mail_id\":\"t1\"}".to_vec());
        let plan = RetryPlan {
            send_mail_id: "t1".to_string(),
            retry_count: 1,
            delay: Duration::from_secs(10),
            recipients: vec!["a@x.com".to_string(), "b@y.com".to_string()],
        };

        let envelope = plan.envelope(&original, &Routes::default());

        assert_eq!(envelope.route(), Some(Route::SendRetry));
        assert_eq!(envelope.body, original.body);
        assert_eq!(envelope.headers.retry_count(), RetryCount::Known(1));
        assert_eq!(envelope.headers.get(DELAY).and_then(|d| d.as_int()), Some(10_000));
        assert_eq!(envelope.headers.get_str(RECIPIENTS), Some("a@x.com,b@y.com"));
        assert_eq!(envelope.headers.get_str(SEND_MAIL_ID), Some("t1"));
        assert_eq!(envelope.expiration, Some(Duration::from_secs(10)));
        assert_eq!(
            envelope.headers.recipients(),
            Some(vec!["a@x.com".to_string(), "b@y.com".to_string()])
        );
    }

    #[test]
    fn successor_goes_to_the_configured_retry_address() {
        let routes = Routes::default()
            .publish_to(Route::SendRetry, Address::new("delays", "delayed"))
            .unwrap();
        let plan = RetryPlan {
            send_mail_id: "t1".to_string(),
            retry_count: 2,
            delay: Duration::from_secs(20),
            recipients: vec!["a@x.com".to_string()],
        };

        let envelope = plan.envelope(&Envelope::new("mail", "sent", Vec::new()), &routes);

        assert_eq!(envelope.exchange, "delays");
        assert_eq!(envelope.routing_key, "delayed");
        assert_eq!(envelope.route(), None);
        assert_eq!(routes.resolve(&envelope.exchange, &envelope.routing_key), Some(Route::SendRetry));
    }
}
