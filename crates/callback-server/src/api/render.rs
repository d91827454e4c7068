//! Result pages for browser redirects and acknowledgements for server calls.

use super::types::CallbackAck;
use crate::error::ServerError;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use gateway_client::format_amount;
use settlement::{CallbackOutcome, ProvisioningOutcome, SettlementError};

pub fn ack(outcome: &CallbackOutcome) -> CallbackAck {
    let status = match outcome {
        CallbackOutcome::Settled(_) => "settled",
        CallbackOutcome::AlreadyProcessed { .. } => "already_processed",
    };
    CallbackAck {
        status: status.to_string(),
        order_id: outcome.order_id().to_string(),
    }
}

/// Page shown to a user returning from the provider.
pub fn result_page(result: Result<CallbackOutcome, SettlementError>) -> Response {
    match result {
        Ok(outcome) => {
            let note = match &outcome {
                CallbackOutcome::Settled(report) => match report.outcome {
                    ProvisioningOutcome::Failed { .. } => {
                        "Your payment was received. Our support team will finish setting up your service."
                    }
                    _ => "Your payment was received. You can return to the bot.",
                },
                CallbackOutcome::AlreadyProcessed { .. } => {
                    "This payment has already been confirmed. You can return to the bot."
                }
            };
            let body = page(
                "Payment successful",
                &format!(
                    "<p>{}</p><dl><dt>Order</dt><dd>{}</dd><dt>Amount</dt><dd>{}</dd></dl>",
                    escape(note),
                    escape(outcome.order_id()),
                    format_amount(outcome.amount())
                ),
            );
            (StatusCode::OK, Html(body)).into_response()
        }
        Err(e) => {
            let (status, _) = ServerError::from(e).status_and_code();
            let message = if status == StatusCode::SERVICE_UNAVAILABLE {
                "We could not reach the payment provider. Your payment will be confirmed automatically if it went through."
            } else {
                "Your payment could not be confirmed. If money was taken from your account, it will be returned by your bank."
            };
            let body = page("Payment not confirmed", &format!("<p>{}</p>", escape(message)));
            (status, Html(body)).into_response()
        }
    }
}

fn page(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title></head><body><h1>{title}</h1>{content}</body></html>",
        title = escape(title),
        content = content
    )
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
