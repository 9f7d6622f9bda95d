use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Payment processor that collected (or will collect) the money for a subscription.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, AsRefStr, Display,
    EnumString,
)]
#[sqlx(type_name = "payment_provider", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PaymentProvider {
    /// Recurring plans: customer + checkout session + provider-side subscription.
    Stripe,
    /// Fixed-term plans: order + payment, confirmed by client signature and webhook.
    Razorpay,
}

impl PaymentProvider {
    pub fn display_name(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "Stripe",
            PaymentProvider::Razorpay => "Razorpay",
        }
    }

    /// Header carrying the webhook signature for this provider.
    pub fn signature_header(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe-signature",
            PaymentProvider::Razorpay => "x-razorpay-signature",
        }
    }

    /// Whether checkout completes on the provider's hosted page.
    pub fn requires_external_checkout(&self) -> bool {
        matches!(self, PaymentProvider::Stripe)
    }

    pub fn all() -> &'static [PaymentProvider] {
        &[PaymentProvider::Stripe, PaymentProvider::Razorpay]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_from_path_segment() {
        assert_eq!(
            PaymentProvider::from_str("stripe").unwrap(),
            PaymentProvider::Stripe
        );
        assert_eq!(
            PaymentProvider::from_str("Razorpay").unwrap(),
            PaymentProvider::Razorpay
        );
        assert!(PaymentProvider::from_str("paypal").is_err());
    }

    #[test]
    fn display_matches_storage_name() {
        assert_eq!(PaymentProvider::Stripe.to_string(), "stripe");
        assert_eq!(PaymentProvider::Razorpay.as_ref(), "razorpay");
    }

    #[test]
    fn only_stripe_redirects() {
        assert!(PaymentProvider::Stripe.requires_external_checkout());
        assert!(!PaymentProvider::Razorpay.requires_external_checkout());
    }
}
