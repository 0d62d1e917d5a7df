// Messages between the application loop and a front end.

use leaddesk_core::Identity;

use crate::conversation::ConversationView;
use crate::leads::{LeadRow, UserProfile, UserSummary};
use crate::notice::Notice;
use crate::stats::MortgageStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Dashboard,
    Messages,
}

/// Commands from the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    SignIn,
    SignOut,
    /// Clear and refetch the dashboard data.
    Reload,
    ShowView(View),
    /// Show the customer behind a lead, by lead path.
    OpenLead(String),
    /// Open the live conversation with a user.
    SelectUser(String),
    CloseConversation,
    /// Send to the currently selected user.
    SendMessage(String),
    Quit,
}

/// State pushed to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    SignedIn(Identity),
    SignedOut,
    ViewChanged(View),
    /// `None` clears the statistics.
    Stats(Option<MortgageStats>),
    Leads(Vec<LeadRow>),
    LeadDetail { user_id: String, profile: UserProfile },
    Users(Vec<UserSummary>),
    Conversation {
        counterpart: Option<UserSummary>,
        view: ConversationView,
    },
    /// The full current notice list.
    Notices(Vec<Notice>),
}
