use crate::types::Category;
use crate::utils::{anchor, escape_html, github_anchor};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Result of classifying one stored event payload for a given viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Rendered(RenderedEvent),
    /// The event stays stored but is excluded from the rendered timeline.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEvent {
    pub category: Category,
    pub html: String,
}

/// Everything a type handler may look at. Actor and repo come from the
/// event envelope, the payload shape depends on the event type.
pub struct EventContext<'a> {
    pub actor: &'a str,
    pub payload: &'a Value,
}

/// What a type handler produces: the base category, the escaped action
/// phrase, and an optional trailer appended after the repo link (e.g. the
/// fork target). Returning None means a required payload field was missing.
pub struct Activity {
    pub category: Category,
    pub action_html: String,
    pub trailer_html: Option<String>,
}

pub type Handler = fn(&EventContext<'_>) -> Option<Activity>;

/// Maps an open-ended, upstream-defined event type string to a category and
/// a rendered description. Pure: no I/O, no state beyond the handler table.
/// Unrecognized types classify as Skip so upstream schema drift never breaks
/// a batch; new types can be registered without touching existing handlers.
pub struct EventClassifier {
    handlers: HashMap<&'static str, Handler>,
}

impl EventClassifier {
    pub fn new() -> Self {
        let mut classifier = Self {
            handlers: HashMap::new(),
        };
        classifier.register("WatchEvent", watch_event);
        classifier.register("CreateEvent", create_event);
        classifier.register("DeleteEvent", delete_event);
        classifier.register("ForkEvent", fork_event);
        classifier.register("PushEvent", push_event);
        classifier.register("PullRequestEvent", pull_request_event);
        classifier.register("IssuesEvent", issues_event);
        classifier.register("IssueCommentEvent", issue_comment_event);
        classifier.register("CommitCommentEvent", commit_comment_event);
        classifier.register("GollumEvent", gollum_event);
        classifier
    }

    /// Register a handler for an event type, replacing any existing one.
    pub fn register(&mut self, event_type: &'static str, handler: Handler) {
        self.handlers.insert(event_type, handler);
    }

    pub fn recognizes(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Classify a stored raw payload for the viewer whose timeline is being
    /// rendered. Never panics for any input: missing or malformed fields
    /// degrade to Skip. Categorization is viewer-relative; events touching
    /// the viewer's own repositories land in the personal bucket no matter
    /// what their base category is.
    pub fn classify(&self, content: &Value, viewer_login: &str) -> Classification {
        let Some(event_type) = content.get("type").and_then(Value::as_str) else {
            warn!("event without a type field, skipping");
            return Classification::Skip;
        };

        let Some(handler) = self.handlers.get(event_type) else {
            debug!(event_type, "unrecognized event type, skipping");
            return Classification::Skip;
        };

        let Some(actor) = content.pointer("/actor/login").and_then(Value::as_str) else {
            warn!(event_type, "event missing actor.login, skipping");
            return Classification::Skip;
        };
        let Some(repo) = content.pointer("/repo/name").and_then(Value::as_str) else {
            warn!(event_type, "event missing repo.name, skipping");
            return Classification::Skip;
        };

        let empty = Value::Null;
        let payload = content.get("payload").unwrap_or(&empty);
        let context = EventContext { actor, payload };

        let Some(activity) = handler(&context) else {
            warn!(event_type, "event payload missing required fields, skipping");
            return Classification::Skip;
        };

        // The viewer's own repos get a dedicated section even when the actor
        // is someone else.
        let repo_owner = repo.split('/').next().unwrap_or(repo);
        let category = if repo_owner == viewer_login {
            Category::Personal
        } else {
            activity.category
        };

        let mut html = format!(
            "{} {} {}.",
            github_anchor(actor),
            activity.action_html,
            github_anchor(repo)
        );
        if let Some(trailer) = activity.trailer_html {
            html.push_str(&trailer);
        }

        Classification::Rendered(RenderedEvent { category, html })
    }
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed ref-type to category table for CreateEvent.
const CREATE_REF_CATEGORIES: &[(&str, Category)] = &[("repository", Category::Repo)];

fn create_ref_category(ref_type: &str) -> Category {
    CREATE_REF_CATEGORIES
        .iter()
        .find(|(name, _)| *name == ref_type)
        .map(|(_, category)| *category)
        // ref types the table does not know fall back to the repo bucket
        .unwrap_or(Category::Repo)
}

// Per-type payload shapes, validated at classification time. Extra fields
// are ignored; missing required fields fail deserialization and skip the
// event rather than propagating a lookup failure.

#[derive(Deserialize)]
struct RefPayload {
    ref_type: String,
}

#[derive(Deserialize)]
struct DeletePayload {
    ref_type: String,
    #[serde(rename = "ref")]
    git_ref: String,
}

#[derive(Deserialize)]
struct ForkPayload {
    forkee: Forkee,
}

#[derive(Deserialize)]
struct Forkee {
    name: String,
    svn_url: String,
}

#[derive(Deserialize)]
struct ActionPayload {
    action: String,
}

#[derive(Deserialize)]
struct IssuesPayload {
    action: String,
    issue: IssueRef,
}

#[derive(Deserialize)]
struct IssueCommentPayload {
    issue: IssueRef,
}

#[derive(Deserialize)]
struct IssueRef {
    html_url: String,
    number: u64,
}

#[derive(Deserialize)]
struct CommitCommentPayload {
    comment: CommitComment,
}

#[derive(Deserialize)]
struct CommitComment {
    html_url: String,
    commit_id: String,
}

#[derive(Deserialize)]
struct GollumPayload {
    pages: Vec<WikiPage>,
}

#[derive(Deserialize)]
struct WikiPage {
    action: String,
    page_name: String,
    html_url: String,
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: &Value) -> Option<T> {
    serde_json::from_value(payload.clone()).ok()
}

fn watch_event(_context: &EventContext<'_>) -> Option<Activity> {
    Some(Activity {
        category: Category::Repo,
        action_html: "starred".to_string(),
        trailer_html: None,
    })
}

fn create_event(context: &EventContext<'_>) -> Option<Activity> {
    let payload: RefPayload = parse_payload(context.payload)?;
    Some(Activity {
        category: create_ref_category(&payload.ref_type),
        action_html: format!("created {}", escape_html(&payload.ref_type)),
        trailer_html: None,
    })
}

fn delete_event(context: &EventContext<'_>) -> Option<Activity> {
    let payload: DeletePayload = parse_payload(context.payload)?;
    Some(Activity {
        category: Category::Repo,
        action_html: format!(
            "deleted {} {} at",
            escape_html(&payload.ref_type),
            escape_html(&payload.git_ref)
        ),
        trailer_html: None,
    })
}

fn fork_event(context: &EventContext<'_>) -> Option<Activity> {
    let payload: ForkPayload = parse_payload(context.payload)?;
    let fork_label = format!("{}/{}", context.actor, payload.forkee.name);
    Some(Activity {
        category: Category::Repo,
        action_html: "forked".to_string(),
        trailer_html: Some(format!(
            " to {}",
            anchor(&payload.forkee.svn_url, &fork_label)
        )),
    })
}

fn push_event(_context: &EventContext<'_>) -> Option<Activity> {
    Some(Activity {
        category: Category::Repo,
        action_html: "pushed to".to_string(),
        trailer_html: None,
    })
}

fn pull_request_event(context: &EventContext<'_>) -> Option<Activity> {
    let payload: ActionPayload = parse_payload(context.payload)?;
    Some(Activity {
        category: Category::Repo,
        action_html: format!("{} pull request", escape_html(&payload.action)),
        trailer_html: None,
    })
}

fn issues_event(context: &EventContext<'_>) -> Option<Activity> {
    let payload: IssuesPayload = parse_payload(context.payload)?;
    Some(Activity {
        category: Category::Issue,
        action_html: format!(
            "{} issue ({})",
            escape_html(&payload.action),
            anchor(
                &payload.issue.html_url,
                &format!("#{}", payload.issue.number)
            )
        ),
        trailer_html: None,
    })
}

fn issue_comment_event(context: &EventContext<'_>) -> Option<Activity> {
    let payload: IssueCommentPayload = parse_payload(context.payload)?;
    Some(Activity {
        category: Category::Issue,
        action_html: format!(
            "commented issue ({})",
            anchor(
                &payload.issue.html_url,
                &format!("#{}", payload.issue.number)
            )
        ),
        trailer_html: None,
    })
}

fn commit_comment_event(context: &EventContext<'_>) -> Option<Activity> {
    let payload: CommitCommentPayload = parse_payload(context.payload)?;
    Some(Activity {
        category: Category::Issue,
        action_html: format!(
            "commented on commit {}",
            anchor(&payload.comment.html_url, &payload.comment.commit_id)
        ),
        trailer_html: None,
    })
}

fn gollum_event(context: &EventContext<'_>) -> Option<Activity> {
    let payload: GollumPayload = parse_payload(context.payload)?;
    // Only the first page entry of a multi-page edit is rendered.
    let page = payload.pages.first()?;
    Some(Activity {
        category: Category::Repo,
        action_html: format!(
            "{} wiki {}",
            escape_html(&page.action),
            anchor(&page.html_url, &page.page_name)
        ),
        trailer_html: None,
    })
}
