// Plain-text rendering of dashboard data for the terminal.

use chrono::Local;

use leaddesk_app::conversation::{ConversationView, Direction, Message};
use leaddesk_app::format::clock_time;
use leaddesk_app::leads::{LeadRow, UserProfile, UserSummary};
use leaddesk_app::notice::{Notice, NoticeKind};
use leaddesk_app::stats::MortgageStats;

pub fn stats(stats: &MortgageStats) -> String {
    let width = stats
        .labels
        .iter()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for (label, count) in stats.rows() {
        out.push_str(&format!("{label:<width$}  {count}\n"));
    }
    out.push_str(&format!("{:<width$}  {}\n", "total", stats.total()));
    out
}

pub fn leads(rows: &[LeadRow]) -> String {
    if rows.is_empty() {
        return "No leads found.\n".to_string();
    }
    let header = ["Loan", "Lender", "Rate", "Rent", "Start", "Term", "Document"];
    let cells: Vec<[&str; 7]> = rows
        .iter()
        .map(|r| {
            [
                r.loan.as_str(),
                r.lender.as_str(),
                r.rate.as_str(),
                r.rent.as_str(),
                r.start.as_str(),
                r.term.as_str(),
                r.path.as_str(),
            ]
        })
        .collect();

    let mut widths = header.map(|h| h.chars().count());
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let line = |row: &[&str; 7]| {
        let padded: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = line(&header);
    for row in &cells {
        out.push_str(&line(row));
    }
    out
}

pub fn profile(user_id: &str, profile: &UserProfile) -> String {
    let age = profile.age.map(|a| a.to_string()).unwrap_or_default();
    format!(
        "{name} ({user_id})\n  \
         Address: {address}\n  \
         Age:     {age}\n  \
         Email:   {email}\n  \
         Phone:   {phone}\n  \
         Photo:   {photo}\n",
        name = profile.name,
        address = profile.address,
        email = profile.email,
        phone = profile.phone,
        photo = profile.photo_url,
    )
}

pub fn users(users: &[UserSummary]) -> String {
    if users.is_empty() {
        return "No users found.\n".to_string();
    }
    users
        .iter()
        .map(|u| format!("{}  {} <{}>\n", u.id, u.profile.name, u.profile.email))
        .collect()
}

pub fn conversation(counterpart: Option<&UserSummary>, view: &ConversationView) -> String {
    let title = counterpart
        .map(|c| c.profile.name.as_str())
        .unwrap_or(ConversationView::NO_USER_SELECTED);
    let mut out = format!("== {title} ==\n");
    if let Some(placeholder) = view.placeholder() {
        out.push_str(placeholder);
        out.push('\n');
        return out;
    }
    for message in view.messages() {
        out.push_str(&message_line(counterpart, message));
    }
    out
}

/// One chat line: inbound messages carry the counterpart's name.
pub fn message_line(counterpart: Option<&UserSummary>, message: &Message) -> String {
    let sender = match message.direction {
        Direction::Inbound => counterpart.map(|c| c.profile.name.as_str()).unwrap_or("Client"),
        Direction::Outbound => "You",
    };
    format!(
        "[{}] {}: {}\n",
        clock_time(&message.sent.with_timezone(&Local)),
        sender,
        message.text
    )
}

pub fn notice(notice: &Notice) -> String {
    let tag = match notice.kind {
        NoticeKind::Success => "ok",
        NoticeKind::Warning => "warning",
    };
    format!("[{tag}] {}: {}\n", notice.title, notice.message)
}
