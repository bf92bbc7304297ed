//! Alert delivery — SMTP email with color-coded trading signals.
//!
//! The messenger is a collaborator: it receives a subject, an HTML or
//! plain body, and an optional attachment, and performs transport.
//! Delivery failure is logged by callers and never fails a scan.

use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::edge::Signal;

const SMTP_HOST: &str = "smtp.gmail.com";

/// SMTP mailer configured from the environment:
/// EMAIL_TO, SMTP_FROM, SMTP_PASSWORD.
pub struct Mailer {
    from: String,
    to: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl Mailer {
    pub fn new(from: &str, to: &str, password: &str) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(SMTP_HOST)
            .context("failed to configure SMTP relay")?
            .credentials(Credentials::new(from.to_string(), password.to_string()))
            .build();
        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            transport,
        })
    }

    /// Build a mailer from env vars, or None when email is not configured.
    pub fn from_env() -> Option<Self> {
        let to = std::env::var("EMAIL_TO").ok()?;
        let from = std::env::var("SMTP_FROM").ok()?;
        let password = std::env::var("SMTP_PASSWORD").ok()?;
        if to.is_empty() || from.is_empty() || password.is_empty() {
            return None;
        }
        Self::new(&from, &to, &password).ok()
    }

    /// Send a message. `body` is HTML when `html` is true, otherwise
    /// plain text. The optional attachment is `(filename, bytes)`.
    async fn send_message(
        &self,
        subject: &str,
        body: &str,
        html: bool,
        attachment: Option<(String, Vec<u8>)>,
    ) -> Result<()> {
        let content_type = if html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };
        let body_part = SinglePart::builder()
            .header(content_type)
            .body(body.to_string());

        let builder = Message::builder()
            .from(self.from.parse().context("bad sender address")?)
            .to(self.to.parse().context("bad recipient address")?)
            .subject(subject);

        let message = match attachment {
            Some((filename, bytes)) => {
                let attached = Attachment::new(filename).body(
                    bytes,
                    ContentType::parse("application/json").context("bad attachment type")?,
                );
                builder.multipart(MultiPart::mixed().singlepart(body_part).singlepart(attached))?
            }
            None => builder.multipart(MultiPart::mixed().singlepart(body_part))?,
        };

        info!("Sending email: {subject}");
        self.transport
            .send(message)
            .await
            .context("SMTP send failed")?;
        Ok(())
    }

    /// Send an HTML alert (spike bursts).
    pub async fn send(
        &self,
        subject: &str,
        html_body: &str,
        attachment: Option<(String, Vec<u8>)>,
    ) -> Result<()> {
        self.send_message(subject, html_body, true, attachment).await
    }

    /// Send the daily scan report: markdown body as plain text with the
    /// JSON slate attached.
    pub async fn send_report(
        &self,
        subject: &str,
        report_md: &str,
        slate_json: Option<(String, Vec<u8>)>,
    ) -> Result<()> {
        self.send_message(subject, report_md, false, slate_json).await
    }
}

// ── Spike alert HTML ─────────────────────────────────────────────────

fn signal_color(signal: Signal) -> &'static str {
    match signal {
        Signal::StrongBuy | Signal::Buy => "#22c55e",
        Signal::Hold => "#eab308",
        Signal::Caution | Signal::NoEdge => "#ef4444",
    }
}

/// One row of the conviction trend table. A row with no signal yet
/// renders as a greyed "(pending)" placeholder.
pub fn conviction_row(
    index: u32,
    total: u32,
    time_str: &str,
    signal: Option<Signal>,
    temp_f: Option<f64>,
    price_cents: Option<i64>,
    is_current: bool,
) -> String {
    let Some(signal) = signal else {
        return format!(
            "<tr style=\"color:#9ca3af;\"><td>[{index}/{total}]</td><td>{time_str}</td><td>(pending)</td><td></td><td></td></tr>"
        );
    };
    let marker = if is_current { " &larr; you are here" } else { "" };
    let temp_str = temp_f.map_or(String::new(), |t| format!("{t:.1}&deg;F"));
    let price_str = price_cents.map_or(String::new(), |p| format!("{p}&cent;"));
    format!(
        "<tr><td>[{index}/{total}]</td><td>{time_str}</td>\
         <td style=\"color:{};font-weight:bold;\">{}</td>\
         <td>{temp_str}</td><td>{price_str}{marker}</td></tr>",
        signal_color(signal),
        signal.as_str(),
    )
}

/// Full HTML body for one spike alert email.
#[allow(clippy::too_many_arguments)]
pub fn build_spike_email_html(
    city: &str,
    bracket: &str,
    email_number: u32,
    email_total: u32,
    time_str: &str,
    old_price: i64,
    new_price: i64,
    current_price: i64,
    spike_delta: i64,
    metar_f: Option<i64>,
    precise_f: Option<f64>,
    precise_c: Option<f64>,
    precise_source: &str,
    running_max_f: Option<i64>,
    margin_c: Option<f64>,
    margin_status: &str,
    signal: Signal,
    signal_reason: &str,
    time_risk: &str,
    conviction_rows: &[String],
) -> String {
    let color = signal_color(signal);
    let label = signal.as_str();

    let metar_str = metar_f.map_or("&mdash;".to_string(), |v| format!("{v}&deg;F"));
    let precise_f_str = precise_f.map_or("&mdash;".to_string(), |v| format!("{v:.1}&deg;F"));
    let precise_c_str = precise_c.map_or(String::new(), |v| format!("({v:.1}&deg;C)"));
    let max_str = running_max_f.map_or("&mdash;".to_string(), |v| format!("{v}&deg;F"));
    let margin_str = margin_c.map_or("&mdash;".to_string(), |m| {
        format!("{m:+.2}&deg;C ({margin_status})")
    });
    let conviction_html = conviction_rows.join("\n");

    let td_grey = "style=\"color:#9ca3af;\"";
    let bg_panel = "background:#16213e;border-radius:8px;padding:16px;margin:12px 0;";
    let body_css = "font-family:Consolas,monospace;background:#1a1a2e;color:#e0e0e0;padding:20px;";
    let signal_css =
        format!("background:{color};border-radius:8px;padding:20px;margin:12px 0;text-align:center;");

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="{body_css}">
<div style="max-width:600px;margin:0 auto;">

<h2 style="color:#fff;margin-bottom:4px;">SPIKE ALERT: {city} {bracket}</h2>
<p style="color:#9ca3af;margin-top:0;">Email {email_number} of {email_total} &mdash; {time_str}</p>

<div style="{bg_panel}">
<h3 style="color:#9ca3af;margin:0 0 8px 0;font-size:13px;">MARKET</h3>
<p style="font-size:18px;margin:0;">
{old_price}&cent; &rarr; {new_price}&cent;
(+{spike_delta}&cent;) &mdash; now at {current_price}&cent;
</p>
</div>

<div style="{bg_panel}">
<h3 style="color:#9ca3af;margin:0 0 8px 0;font-size:13px;">EDGE ANALYSIS</h3>
<table style="width:100%;color:#e0e0e0;font-size:14px;">
<tr><td {td_grey}>METAR (rounded):</td><td>{metar_str}</td></tr>
<tr><td {td_grey}>Precise ({precise_source}):</td><td>{precise_f_str} {precise_c_str}</td></tr>
<tr><td {td_grey}>Running max:</td><td>{max_str}</td></tr>
<tr><td {td_grey}>Margin:</td><td>{margin_str}</td></tr>
</table>
</div>

<div style="{signal_css}">
<span style="font-size:24px;font-weight:bold;color:#fff;">{label}</span>
<br>
<span style="font-size:13px;color:rgba(255,255,255,0.8);">Time risk: {time_risk}</span>
</div>

<p style="color:#d1d5db;font-size:13px;margin:8px 0;">{signal_reason}</p>

<div style="{bg_panel}">
<h3 style="color:#9ca3af;margin:0 0 8px 0;font-size:13px;">CONVICTION TREND</h3>
<table style="width:100%;color:#e0e0e0;font-size:13px;">
{conviction_html}
</table>
</div>

</div>
</body>
</html>"#
    )
}
