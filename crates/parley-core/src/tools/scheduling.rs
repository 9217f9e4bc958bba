//! Calendar and email tools for the scheduling agent
//!
//! Each tool acts for one user (the exchange owner) and reports back in
//! plain text: numbered slot lists, labeled fields, short notes about
//! calendars that could not be checked.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use parley_calendar::{
    AccountFailure, AvailabilityAggregator, AvailabilityOptions, CalendarError, SlotQuery,
    TimeInterval,
};
use parley_exchange::{ExchangeMessage, ExchangeStore, User, normalize_recipients};
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{ToolHandler, json_schema};
use crate::compose;
use crate::config::ParleyConfig;
use crate::mail::{EmailBody, MailTransport, OutboundEmail};

const MAX_SLOT_RESULTS: usize = 10;

/// Process-wide handles shared by every tool
pub struct SchedulingServices {
    pub aggregator: Arc<AvailabilityAggregator>,
    pub store: Arc<ExchangeStore>,
    pub mail: Arc<dyn MailTransport>,
    pub config: Arc<ParleyConfig>,
}

/// The user a tool invocation acts for
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    pub user: User,
    pub timezone: Tz,
}

impl SchedulingContext {
    pub fn for_user(user: User, config: &ParleyConfig) -> Self {
        let timezone = config.timezone_for(&user.timezone);
        Self { user, timezone }
    }

    /// Calendar provider key for this user
    fn calendar_user(&self) -> &str {
        &self.user.email
    }
}

/// All scheduling tools bound to one user
pub fn scheduling_tools(
    services: Arc<SchedulingServices>,
    context: Arc<SchedulingContext>,
) -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(FindBookableSlotsTool::new(services.clone(), context.clone())),
        Arc::new(CheckBusyStatusTool::new(services.clone(), context.clone())),
        Arc::new(RequestSchedulingOverEmailTool::new(
            services.clone(),
            context.clone(),
        )),
        Arc::new(RequestReschedulingOverEmailTool::new(services, context)),
    ]
}

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing '{}' parameter", key))
}

fn parse_window(input: &Value) -> Result<TimeInterval> {
    let start = required_str(input, "start")?;
    let end = required_str(input, "end")?;
    TimeInterval::parse(start, end).context("Invalid search window")
}

/// Optional array of `{start, end}` objects
fn parse_intervals(input: &Value, key: &str) -> Result<Vec<TimeInterval>> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .with_context(|| format!("'{}' must be a list of {{start, end}} objects", key)),
    }
}

fn failure_note(failures: &[AccountFailure]) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    let accounts: Vec<&str> = failures.iter().map(|f| f.account_id.as_str()).collect();
    Some(format!(
        "Note: calendars on {} could not be checked, so these results may be incomplete.",
        accounts.join(", ")
    ))
}

/// Addresses that may be emailed on the user's behalf
fn external_attendees(candidates: &[String], user: &User, own_domain: &str) -> Vec<String> {
    normalize_recipients(candidates)
        .into_iter()
        .filter(|addr| {
            *addr != user.email
                && !addr
                    .rsplit_once('@')
                    .is_some_and(|(_, d)| d.eq_ignore_ascii_case(own_domain.trim_start_matches('@')))
        })
        .collect()
}

/// Send a message opening a new exchange owned by the user and persist it.
///
/// The email is sent once. A storage failure after the send is logged and
/// does not turn into an error, since the email is already out.
async fn send_new_exchange(
    services: &SchedulingServices,
    context: &SchedulingContext,
    attendees: Vec<String>,
    subject: String,
    body: String,
) -> Result<Option<Uuid>> {
    let email = OutboundEmail {
        to: attendees,
        cc: vec![context.user.email.clone()],
        bcc: Vec::new(),
        subject,
        body: EmailBody::Text(body),
        in_reply_to: None,
    };

    let message_id = services
        .mail
        .send(&email)
        .await
        .context("Failed to send email")?;
    info!(
        "Sent {} to {:?} for {}",
        message_id, email.to, context.user.email
    );

    let message = ExchangeMessage::outbound_new(
        message_id,
        Some(context.user.email.clone()),
        &services.config.assistant.address,
        &email.all_recipients(),
        &email.subject,
        email.body.as_str(),
        Utc::now(),
    );
    match services.store.insert(&message).await {
        Ok(stored) => Ok(Some(stored.exchange_id)),
        Err(e) => {
            error!("Sent {} but failed to store it: {}", message.message_id, e);
            Ok(None)
        }
    }
}

/// Bookable slots on the user's calendars
pub struct FindBookableSlotsTool {
    services: Arc<SchedulingServices>,
    context: Arc<SchedulingContext>,
}

impl FindBookableSlotsTool {
    pub fn new(services: Arc<SchedulingServices>, context: Arc<SchedulingContext>) -> Self {
        Self { services, context }
    }
}

#[async_trait]
impl ToolHandler for FindBookableSlotsTool {
    fn name(&self) -> &str {
        "find_bookable_slots"
    }

    fn description(&self) -> &str {
        "Find open meeting times on the user's calendars within a window. \
         Returns a numbered list of slots in the user's timezone."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "start": {
                    "type": "string",
                    "description": "Window start (RFC 3339)"
                },
                "end": {
                    "type": "string",
                    "description": "Window end (RFC 3339)"
                },
                "duration_minutes": {
                    "type": "integer",
                    "description": "Meeting length in minutes (default 30)"
                },
                "exclude_slots": {
                    "type": "array",
                    "description": "Times already offered or declined, as {start, end} objects",
                    "items": {
                        "type": "object",
                        "properties": {
                            "start": {"type": "string"},
                            "end": {"type": "string"}
                        }
                    }
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of slots to return (default 3, max 10)"
                }
            }),
            vec!["start", "end"],
        )
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let slots_config = &self.services.config.slots;
        let window = parse_window(&input)?;
        let duration = input
            .get("duration_minutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(slots_config.default_duration_minutes);
        let max_results = input
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(slots_config.max_results)
            .clamp(1, MAX_SLOT_RESULTS);
        let exclude = parse_intervals(&input, "exclude_slots")?;

        debug!(
            "Slot search for {}: {} min, max {}, {} excluded",
            self.context.user.email,
            duration,
            max_results,
            exclude.len()
        );

        let query = SlotQuery::new(window, duration, self.context.timezone)
            .with_granularity(slots_config.granularity_minutes)
            .with_max_results(max_results);
        let search = self
            .services
            .aggregator
            .find_bookable_slots(self.context.calendar_user(), &query, &exclude)
            .await?;

        let intervals: Vec<TimeInterval> = search.slots.iter().map(|s| s.interval).collect();
        let mut text = compose::format_slots(&intervals, &self.context.timezone);
        if let Some(note) = failure_note(&search.failures) {
            text.push_str("\n\n");
            text.push_str(&note);
        }
        Ok(text)
    }
}

/// Busy and free time on the user's calendars
pub struct CheckBusyStatusTool {
    services: Arc<SchedulingServices>,
    context: Arc<SchedulingContext>,
}

impl CheckBusyStatusTool {
    pub fn new(services: Arc<SchedulingServices>, context: Arc<SchedulingContext>) -> Self {
        Self { services, context }
    }
}

#[async_trait]
impl ToolHandler for CheckBusyStatusTool {
    fn name(&self) -> &str {
        "check_busy_status"
    }

    fn description(&self) -> &str {
        "Check when the user is busy or free within a window, including the events in it."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "start": {
                    "type": "string",
                    "description": "Window start (RFC 3339)"
                },
                "end": {
                    "type": "string",
                    "description": "Window end (RFC 3339)"
                }
            }),
            vec!["start", "end"],
        )
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let window = parse_window(&input)?;
        let tz = self.context.timezone;
        let options =
            AvailabilityOptions::new(tz, self.services.config.slots.default_duration_minutes);
        let report = self
            .services
            .aggregator
            .check_availability(self.context.calendar_user(), &window, &options)
            .await?;

        let mut sections = Vec::new();
        if report.busy.is_empty() {
            sections.push("Busy: none in this window.".to_string());
        } else {
            let lines: Vec<String> = report
                .busy
                .iter()
                .map(|b| format!("- {}", compose::format_interval(b, &tz)))
                .collect();
            sections.push(format!("Busy:\n{}", lines.join("\n")));
        }

        if report.free.is_empty() {
            sections.push("Free: no open time long enough for a meeting.".to_string());
        } else {
            let lines: Vec<String> = report
                .free
                .iter()
                .map(|f| format!("- {}", compose::format_interval(f, &tz)))
                .collect();
            sections.push(format!("Free:\n{}", lines.join("\n")));
        }

        if !report.events.is_empty() {
            let events: Vec<String> = report
                .events
                .iter()
                .map(|e| compose::format_event_summary(e, &tz))
                .collect();
            sections.push(format!("Events:\n{}", events.join("\n\n")));
        }

        if let Some(note) = failure_note(&report.failures) {
            sections.push(note);
        }
        Ok(sections.join("\n\n"))
    }
}

/// Email attendees a set of proposed times on a new thread
pub struct RequestSchedulingOverEmailTool {
    services: Arc<SchedulingServices>,
    context: Arc<SchedulingContext>,
}

impl RequestSchedulingOverEmailTool {
    pub fn new(services: Arc<SchedulingServices>, context: Arc<SchedulingContext>) -> Self {
        Self { services, context }
    }
}

#[async_trait]
impl ToolHandler for RequestSchedulingOverEmailTool {
    fn name(&self) -> &str {
        "request_scheduling_over_email"
    }

    fn description(&self) -> &str {
        "Email attendees on a new thread proposing meeting times on the user's behalf. \
         The user is copied."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "attendees": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Email addresses to invite"
                },
                "slots": {
                    "type": "array",
                    "description": "Proposed times as {start, end} objects (RFC 3339)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "start": {"type": "string"},
                            "end": {"type": "string"}
                        }
                    }
                },
                "summary": {
                    "type": "string",
                    "description": "What the meeting is about"
                }
            }),
            vec!["attendees", "slots", "summary"],
        )
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let summary = required_str(&input, "summary")?.trim();
        if summary.is_empty() {
            bail!("'summary' must not be empty");
        }
        let requested: Vec<String> = input
            .get("attendees")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow!("Missing 'attendees' parameter"))?
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
        let attendees = external_attendees(
            &requested,
            &self.context.user,
            &self.services.config.assistant.own_domain,
        );
        if attendees.is_empty() {
            return Ok("No attendees to email: the list was empty or only contained \
                       the user and assistant addresses."
                .to_string());
        }
        let slots = parse_intervals(&input, "slots")?;

        let tz = self.context.timezone;
        let (subject, body) =
            compose::scheduling_request(self.context.user.display_name(), summary, &slots, &tz);
        let exchange = send_new_exchange(
            &self.services,
            &self.context,
            attendees.clone(),
            subject,
            body,
        )
        .await?;

        let mut text = format!(
            "Scheduling request sent to {} ({} proposed times).",
            attendees.join(", "),
            slots.len()
        );
        if let Some(exchange_id) = exchange {
            text.push_str(&format!("\nExchange: {}", exchange_id));
        }
        if !slots.is_empty() {
            text.push_str("\n\n");
            text.push_str(&compose::format_slots(&slots, &tz));
        }
        Ok(text)
    }
}

/// Email an event's attendees proposing new times
pub struct RequestReschedulingOverEmailTool {
    services: Arc<SchedulingServices>,
    context: Arc<SchedulingContext>,
}

impl RequestReschedulingOverEmailTool {
    pub fn new(services: Arc<SchedulingServices>, context: Arc<SchedulingContext>) -> Self {
        Self { services, context }
    }
}

#[async_trait]
impl ToolHandler for RequestReschedulingOverEmailTool {
    fn name(&self) -> &str {
        "request_rescheduling_over_email"
    }

    fn description(&self) -> &str {
        "Email the attendees of an existing event proposing new times for it."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "event_id": {
                    "type": "string",
                    "description": "ID of the event to move"
                },
                "slots": {
                    "type": "array",
                    "description": "Proposed new times as {start, end} objects (RFC 3339)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "start": {"type": "string"},
                            "end": {"type": "string"}
                        }
                    }
                },
                "reason": {
                    "type": "string",
                    "description": "Why the meeting needs to move"
                }
            }),
            vec!["event_id", "slots"],
        )
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let event_id = required_str(&input, "event_id")?.trim();
        let reason = input.get("reason").and_then(|v| v.as_str()).unwrap_or("");
        let slots = parse_intervals(&input, "slots")?;

        let event = match self
            .services
            .aggregator
            .find_event(self.context.calendar_user(), event_id)
            .await
        {
            Ok(event) => event,
            Err(CalendarError::NotFound { .. }) => {
                return Ok(format!(
                    "No event with ID {} was found on {}'s calendars.",
                    event_id,
                    self.context.user.display_name()
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let attendees = external_attendees(
            &event.attendees,
            &self.context.user,
            &self.services.config.assistant.own_domain,
        );
        if attendees.is_empty() {
            return Ok(format!(
                "Event {} has no other attendees to email.",
                event.summary
            ));
        }

        let tz = self.context.timezone;
        let (subject, body) = compose::rescheduling_request(
            self.context.user.display_name(),
            &event,
            reason,
            &slots,
            &tz,
        );
        send_new_exchange(
            &self.services,
            &self.context,
            attendees.clone(),
            subject,
            body,
        )
        .await?;

        Ok(format!(
            "Rescheduling request for {} sent to {} ({} proposed times).",
            event.summary,
            attendees.join(", "),
            slots.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::RecordingTransport;
    use crate::tools::{ToolExecutor, ToolRegistry};
    use parley_calendar::FixtureCalendarProvider;

    const CALENDARS: &str = r#"{
        "users": {
            "ana@example.com": [
                {"account_id": "work", "calendar_id": "work-main", "primary": true},
                {"account_id": "home", "calendar_id": "home-main"}
            ]
        },
        "busy": {
            "work-main": [{"start": "2024-03-05T09:00:00Z", "end": "2024-03-05T10:00:00Z"}]
        },
        "events": [
            {
                "id": "evt-review",
                "calendar_id": "work-main",
                "summary": "Design review",
                "start": "2024-03-05T15:00:00Z",
                "end": "2024-03-05T16:00:00Z",
                "attendees": ["ana@example.com", "Bob <bob@x.com>", "assistant@parley.ai"]
            }
        ]
    }"#;

    struct Harness {
        registry: ToolRegistry,
        store: Arc<ExchangeStore>,
        mail: Arc<RecordingTransport>,
    }

    fn harness(calendars: &str) -> Harness {
        let provider = Arc::new(FixtureCalendarProvider::from_json(calendars).unwrap());
        let store = Arc::new(ExchangeStore::open_in_memory().unwrap());
        let mail = Arc::new(RecordingTransport::new("parley.ai"));
        let config = Arc::new(ParleyConfig::default());
        let services = Arc::new(SchedulingServices {
            aggregator: Arc::new(AvailabilityAggregator::new(provider)),
            store: store.clone(),
            mail: mail.clone(),
            config: config.clone(),
        });
        let user = User {
            id: "u1".into(),
            email: "ana@example.com".into(),
            name: "Ana".into(),
            timezone: "UTC".into(),
        };
        let context = Arc::new(SchedulingContext::for_user(user, &config));
        let mut registry = ToolRegistry::new();
        for tool in scheduling_tools(services, context) {
            registry.register(tool);
        }
        Harness {
            registry,
            store,
            mail,
        }
    }

    #[tokio::test]
    async fn test_find_bookable_slots_skips_busy() {
        let h = harness(CALENDARS);
        let text = h
            .registry
            .execute(
                "find_bookable_slots",
                serde_json::json!({
                    "start": "2024-03-05T09:00:00Z",
                    "end": "2024-03-05T12:00:00Z",
                    "duration_minutes": 30,
                    "max_results": 2
                }),
            )
            .await
            .unwrap();
        assert_eq!(
            text,
            "1. Tuesday, March 5, 2024: 10:00 AM - 10:30 AM UTC\n\
             2. Tuesday, March 5, 2024: 10:15 AM - 10:45 AM UTC"
        );
    }

    #[tokio::test]
    async fn test_find_bookable_slots_respects_exclusions() {
        let h = harness(CALENDARS);
        let text = h
            .registry
            .execute(
                "find_bookable_slots",
                serde_json::json!({
                    "start": "2024-03-05T09:00:00Z",
                    "end": "2024-03-05T12:00:00Z",
                    "max_results": 1,
                    "exclude_slots": [
                        {"start": "2024-03-05T10:00:00Z", "end": "2024-03-05T11:00:00Z"}
                    ]
                }),
            )
            .await
            .unwrap();
        assert_eq!(text, "1. Tuesday, March 5, 2024: 11:00 AM - 11:30 AM UTC");
    }

    #[tokio::test]
    async fn test_find_bookable_slots_reports_partial_accounts() {
        let calendars = CALENDARS.replacen(
            "\"events\"",
            "\"unavailable_accounts\": [\"home\"],\n\"events\"",
            1,
        );
        let h = harness(&calendars);
        let text = h
            .registry
            .execute(
                "find_bookable_slots",
                serde_json::json!({
                    "start": "2024-03-05T10:00:00Z",
                    "end": "2024-03-05T11:00:00Z"
                }),
            )
            .await
            .unwrap();
        assert!(text.starts_with("1. Tuesday, March 5, 2024: 10:00 AM"));
        assert!(text.contains("calendars on home could not be checked"));
    }

    #[tokio::test]
    async fn test_find_bookable_slots_rejects_bad_window() {
        let h = harness(CALENDARS);
        let result = h
            .registry
            .execute(
                "find_bookable_slots",
                serde_json::json!({
                    "start": "2024-03-05T12:00:00Z",
                    "end": "2024-03-05T09:00:00Z"
                }),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_find_bookable_slots_rejects_out_of_range_duration() {
        let h = harness(CALENDARS);
        for minutes in [i64::MAX, 1_000_000_000_000_000] {
            let result = h
                .registry
                .execute(
                    "find_bookable_slots",
                    serde_json::json!({
                        "start": "2024-03-05T09:00:00Z",
                        "end": "2024-03-05T12:00:00Z",
                        "duration_minutes": minutes
                    }),
                )
                .await;
            assert!(result.is_err());
        }
    }

    #[tokio::test]
    async fn test_find_bookable_slots_duration_longer_than_window() {
        let h = harness(CALENDARS);
        let text = h
            .registry
            .execute(
                "find_bookable_slots",
                serde_json::json!({
                    "start": "2024-03-05T09:00:00Z",
                    "end": "2024-03-05T12:00:00Z",
                    "duration_minutes": 1_000_000_000_000i64
                }),
            )
            .await
            .unwrap();
        assert_eq!(text, compose::NO_SLOTS_MESSAGE);
    }

    #[tokio::test]
    async fn test_check_busy_status_lists_busy_free_and_events() {
        let h = harness(CALENDARS);
        let text = h
            .registry
            .execute(
                "check_busy_status",
                serde_json::json!({
                    "start": "2024-03-05T08:00:00Z",
                    "end": "2024-03-05T17:00:00Z"
                }),
            )
            .await
            .unwrap();
        assert!(text.contains("Busy:\n- Tuesday, March 5, 2024: 9:00 AM - 10:00 AM UTC"));
        assert!(text.contains("- Tuesday, March 5, 2024: 3:00 PM - 4:00 PM UTC"));
        assert!(text.contains("Free:\n- Tuesday, March 5, 2024: 8:00 AM - 9:00 AM UTC"));
        assert!(text.contains("Event: Design review"));
    }

    #[tokio::test]
    async fn test_request_scheduling_sends_and_persists() {
        let h = harness(CALENDARS);
        let text = h
            .registry
            .execute(
                "request_scheduling_over_email",
                serde_json::json!({
                    "attendees": ["Bob <BOB@x.com>", "ana@example.com", "help@parley.ai"],
                    "summary": "Q3 planning",
                    "slots": [
                        {"start": "2024-03-05T10:00:00Z", "end": "2024-03-05T10:30:00Z"}
                    ]
                }),
            )
            .await
            .unwrap();
        assert!(text.starts_with("Scheduling request sent to bob@x.com (1 proposed times)."));

        let sent = h.mail.sent();
        assert_eq!(sent.len(), 1);
        let (message_id, email) = &sent[0];
        assert_eq!(email.to, vec!["bob@x.com".to_string()]);
        assert_eq!(email.cc, vec!["ana@example.com".to_string()]);
        assert_eq!(email.subject, "Scheduling: Q3 planning");
        assert!(email.in_reply_to.is_none());

        let stored = h.store.get_by_message_id(message_id).await.unwrap().unwrap();
        assert_eq!(stored.exchange_owner_id.as_deref(), Some("ana@example.com"));
        assert_eq!(
            h.store.get_exchange_owner(stored.exchange_id).await.unwrap().as_deref(),
            Some("ana@example.com")
        );
        assert!(text.contains(&stored.exchange_id.to_string()));
    }

    #[tokio::test]
    async fn test_request_scheduling_without_external_attendees() {
        let h = harness(CALENDARS);
        let text = h
            .registry
            .execute(
                "request_scheduling_over_email",
                serde_json::json!({
                    "attendees": ["ana@example.com"],
                    "summary": "Solo",
                    "slots": []
                }),
            )
            .await
            .unwrap();
        assert!(text.starts_with("No attendees to email"));
        assert!(h.mail.sent().is_empty());
    }

    #[tokio::test]
    async fn test_request_rescheduling_emails_event_attendees() {
        let h = harness(CALENDARS);
        let text = h
            .registry
            .execute(
                "request_rescheduling_over_email",
                serde_json::json!({
                    "event_id": "evt-review",
                    "reason": "Conflict with an offsite",
                    "slots": [
                        {"start": "2024-03-06T15:00:00Z", "end": "2024-03-06T16:00:00Z"}
                    ]
                }),
            )
            .await
            .unwrap();
        assert_eq!(
            text,
            "Rescheduling request for Design review sent to bob@x.com (1 proposed times)."
        );

        let sent = h.mail.sent();
        assert_eq!(sent.len(), 1);
        let email = &sent[0].1;
        assert_eq!(email.subject, "Rescheduling: Design review");
        assert!(email.body.as_str().contains("Reason: Conflict with an offsite"));
        assert!(email.body.as_str().contains("ID: evt-review"));
    }

    #[tokio::test]
    async fn test_request_rescheduling_unknown_event_is_text() {
        let h = harness(CALENDARS);
        let text = h
            .registry
            .execute(
                "request_rescheduling_over_email",
                serde_json::json!({"event_id": "evt-missing", "slots": []}),
            )
            .await
            .unwrap();
        assert_eq!(text, "No event with ID evt-missing was found on Ana's calendars.");
        assert!(h.mail.sent().is_empty());
    }

    #[test]
    fn test_external_attendees_filter() {
        let user = User {
            id: "u1".into(),
            email: "ana@example.com".into(),
            name: String::new(),
            timezone: "UTC".into(),
        };
        let list = external_attendees(
            &[
                "ANA@example.com".to_string(),
                "c@x.com".to_string(),
                "c@x.com".to_string(),
                "bot@Parley.ai".to_string(),
            ],
            &user,
            "parley.ai",
        );
        assert_eq!(list, vec!["c@x.com".to_string()]);
    }

    #[test]
    fn test_tool_schemas() {
        let h = harness(CALENDARS);
        assert_eq!(h.registry.len(), 4);
        let tool = h.registry.get("find_bookable_slots").unwrap();
        let schema = tool.input_schema();
        let props = schema.get("properties").unwrap();
        assert!(props.get("exclude_slots").is_some());
        assert_eq!(schema["required"], serde_json::json!(["start", "end"]));
    }
}
