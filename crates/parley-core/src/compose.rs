//! Outbound text: slot lists, event summaries and the fixed notices
//!
//! Everything here is pure formatting. Instants are converted to the reader's
//! timezone only at this point.

use chrono::DateTime;
use chrono_tz::Tz;
use parley_calendar::{CalendarEvent, TimeInterval};
use parley_exchange::EngagementLimits;

pub const NO_SLOTS_MESSAGE: &str = "No available time slots were found in the requested window.";

fn day_label(dt: &DateTime<Tz>) -> String {
    dt.format("%A, %B %-d, %Y").to_string()
}

fn time_label(dt: &DateTime<Tz>) -> String {
    dt.format("%-I:%M %p").to_string()
}

/// `Tuesday, March 5, 2024: 9:00 AM - 9:30 AM EST`
pub fn format_interval(interval: &TimeInterval, tz: &Tz) -> String {
    let start = interval.start().with_timezone(tz);
    let end = interval.end().with_timezone(tz);

    if start.date_naive() == end.date_naive() {
        format!(
            "{}: {} - {} {}",
            day_label(&start),
            time_label(&start),
            time_label(&end),
            end.format("%Z")
        )
    } else {
        format!(
            "{}: {} {} - {}: {} {}",
            day_label(&start),
            time_label(&start),
            start.format("%Z"),
            day_label(&end),
            time_label(&end),
            end.format("%Z")
        )
    }
}

/// 1-indexed list of slots, or an explicit no-slots line
pub fn format_slots(slots: &[TimeInterval], tz: &Tz) -> String {
    if slots.is_empty() {
        return NO_SLOTS_MESSAGE.to_string();
    }

    slots
        .iter()
        .enumerate()
        .map(|(i, slot)| format!("{}. {}", i + 1, format_interval(slot, tz)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_event_summary(event: &CalendarEvent, tz: &Tz) -> String {
    let when = match TimeInterval::new(event.start, event.end) {
        Ok(interval) => format_interval(&interval, tz),
        Err(_) => format!(
            "{} (invalid end time)",
            day_label(&event.start.with_timezone(tz))
        ),
    };

    let mut lines = vec![
        format!("Event: {}", event.summary),
        format!("When: {}", when),
    ];
    if let Some(location) = event.location.as_deref().filter(|l| !l.is_empty()) {
        lines.push(format!("Location: {}", location));
    }
    if !event.attendees.is_empty() {
        lines.push(format!("Attendees: {}", event.attendees.join(", ")));
    }
    lines.push(format!("ID: {}", event.id));
    lines.join("\n")
}

/// Prefix `Re: ` unless the subject already has it
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: (no subject)".to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

pub fn scheduling_request(
    owner_name: &str,
    summary: &str,
    slots: &[TimeInterval],
    tz: &Tz,
) -> (String, String) {
    let subject = format!("Scheduling: {}", summary);
    let body = format!(
        "Hi,\n\n\
         {} would like to find a time to meet about \"{}\". \
         Would any of these times work for you?\n\n\
         {}\n\n\
         Reply with the number of the option that suits you, or suggest another time.\n\n\
         Thanks!",
        owner_name,
        summary,
        format_slots(slots, tz)
    );
    (subject, body)
}

pub fn rescheduling_request(
    owner_name: &str,
    event: &CalendarEvent,
    reason: &str,
    slots: &[TimeInterval],
    tz: &Tz,
) -> (String, String) {
    let subject = format!("Rescheduling: {}", event.summary);
    let reason = reason.trim();
    let reason_line = if reason.is_empty() {
        String::new()
    } else {
        format!("Reason: {}\n\n", reason)
    };
    let body = format!(
        "Hi,\n\n\
         {} needs to move the following meeting:\n\n\
         {}\n\n\
         {}\
         Would any of these times work instead?\n\n\
         {}\n\n\
         Reply with the number of the option that suits you, or suggest another time.\n\n\
         Thanks!",
        owner_name,
        format_event_summary(event, tz),
        reason_line,
        format_slots(slots, tz)
    );
    (subject, body)
}

pub fn stale_thread_notice(assistant_name: &str, limits: &EngagementLimits) -> String {
    format!(
        "Hi,\n\n\
         This email thread is too old or too long for {} to continue \
         (threads stay active for {} days and up to {} messages). \
         Please start a new email thread and I'll be happy to help.\n\n\
         {}",
        assistant_name,
        limits.max_age.num_days(),
        limits.max_messages,
        assistant_name
    )
}

pub fn onboarding_ack(assistant_name: &str) -> String {
    format!(
        "Hi,\n\n\
         Thanks for reaching out! I'm {}, a scheduling assistant. \
         I'm not yet connected to your calendar, so I've sent you a separate \
         email explaining how to get started.\n\n\
         {}",
        assistant_name, assistant_name
    )
}

pub fn onboarding_welcome(assistant_name: &str, assistant_address: &str) -> (String, String) {
    let subject = format!("Get started with {}", assistant_name);
    let body = format!(
        "Hi,\n\n\
         {name} schedules meetings for you over email. To get started:\n\n\
         1. Connect your calendar so I can see when you're free.\n\
         2. Cc {address} on any email where you want to find a time.\n\
         3. I'll propose times, follow up with everyone, and book the meeting.\n\n\
         {name}",
        name = assistant_name,
        address = assistant_address
    );
    (subject, body)
}

pub fn agent_failure_notice(assistant_name: &str) -> String {
    format!(
        "Hi,\n\n\
         Sorry, I ran into a problem while working on this request. \
         I've noted it and will follow up; you can also reply to this email to try again.\n\n\
         {}",
        assistant_name
    )
}
