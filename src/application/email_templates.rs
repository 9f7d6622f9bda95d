use url::Url;

use crate::application::ports::notifier::{Notice, NoticeTemplate};

const BRAND_NAME: &str = "DevOps Console";

fn origin_label(app_origin: &str) -> String {
    Url::parse(app_origin)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()))
        .unwrap_or_else(|| app_origin.to_string())
}

pub fn primary_button(url: &str, label: &str) -> String {
    format!(
        r#"<a href="{url}" style="display:inline-block;padding:12px 18px;background-color:#111827;color:#ffffff;text-decoration:none;border-radius:8px;font-weight:600;">{label}</a>"#
    )
}

fn payload_str<'a>(notice: &'a Notice, key: &str) -> &'a str {
    notice
        .payload
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// Renders `(subject, html)` for a notice.
pub fn render_notice(app_origin: &str, notice: &Notice) -> (String, String) {
    let plan = payload_str(notice, "planName");
    let period_end = payload_str(notice, "periodEnd");
    let billing_url = format!("{}/billing", app_origin.trim_end_matches('/'));

    let (subject, headline, lead) = match notice.template {
        NoticeTemplate::TrialStarted => (
            format!("Your {} trial has started", plan),
            "Welcome aboard".to_string(),
            format!("Your trial of <strong>{plan}</strong> runs until {period_end}."),
        ),
        NoticeTemplate::SubscriptionActivated => (
            format!("Your {} subscription is active", plan),
            "Payment received".to_string(),
            format!("Your <strong>{plan}</strong> subscription is active until {period_end}."),
        ),
        NoticeTemplate::SubscriptionRenewed => (
            format!("Your {} subscription was renewed", plan),
            "Subscription renewed".to_string(),
            format!("We received your renewal. Access continues until {period_end}."),
        ),
        NoticeTemplate::PaymentFailed => (
            "Your payment did not go through".to_string(),
            "Payment failed".to_string(),
            format!("We could not complete your payment for <strong>{plan}</strong>."),
        ),
        NoticeTemplate::SubscriptionPastDue => (
            format!("Action needed: {} payment failed", plan),
            "Renewal payment failed".to_string(),
            format!(
                "We could not charge your renewal for <strong>{plan}</strong>. Please update your payment method."
            ),
        ),
        NoticeTemplate::SubscriptionCancelled => (
            format!("Your {} subscription was cancelled", plan),
            "Subscription cancelled".to_string(),
            format!("Your <strong>{plan}</strong> subscription has been cancelled."),
        ),
        NoticeTemplate::SubscriptionExpired => (
            format!("Your {} subscription has expired", plan),
            "Subscription expired".to_string(),
            format!("Your <strong>{plan}</strong> subscription ended on {period_end}."),
        ),
        NoticeTemplate::ExpiringSoon => (
            format!("Your {} subscription expires soon", plan),
            "Expiring soon".to_string(),
            format!("Your <strong>{plan}</strong> subscription ends on {period_end}."),
        ),
        NoticeTemplate::TrialEnding => (
            "Your trial ends soon".to_string(),
            "Trial ending".to_string(),
            format!("Your <strong>{plan}</strong> trial ends on {period_end}."),
        ),
    };

    let body = primary_button(&billing_url, "Manage subscription");
    let reason = "you have a subscription with us";
    let html = wrap_email(app_origin, &headline, &lead, &body, reason);
    (subject, html)
}

pub fn wrap_email(
    app_origin: &str,
    headline: &str,
    lead: &str,
    body_html: &str,
    reason: &str,
) -> String {
    let origin = origin_label(app_origin);
    let brand = BRAND_NAME;

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <body style="background:#f8fafc;margin:0;padding:24px;font-family:Arial,Helvetica,sans-serif;">
    <div style="max-width:560px;margin:0 auto;background:#ffffff;border:1px solid #e5e7eb;border-radius:12px;padding:24px;">
      <div style="font-size:12px;letter-spacing:0.08em;text-transform:uppercase;color:#6b7280;">{brand} - {origin}</div>
      <h1 style="margin:12px 0 8px;font-size:22px;color:#111827;">{headline}</h1>
      <p style="margin:0 0 12px;font-size:15px;color:#111827;line-height:1.6;">{lead}</p>
      {body_html}
      <div style="margin-top:20px;padding-top:16px;border-top:1px solid #e5e7eb;">
        <p style="margin:0;font-size:13px;color:#4b5563;">Why you got this email: {reason}.</p>
      </div>
    </div>
  </body>
</html>"#
    )
}
