use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work tracked through the LEAD → PLAN → EXEC lifecycle.
///
/// Directives form at most a two-level hierarchy: a parent decomposes into
/// children that execute one after another, linked by `depends_on`.
///
/// `progress_cache` is a display hint only. Gating decisions always re-derive
/// progress from collaborator state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Directive {
    pub id: Uuid,
    /// Human-facing key, e.g. `SD-AUTH-001`. A reserved prefix selects the quick-fix profile.
    pub key: String,
    pub title: String,
    pub declared_type: String,
    pub status: DirectiveStatus,
    pub parent_id: Option<Uuid>,
    pub relationship_type: RelationshipType,
    pub priority: Priority,
    /// Predecessor in the parent's child chain. Only set on children.
    pub depends_on: Option<Uuid>,
    pub progress_cache: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Directive {
    pub fn is_child(&self) -> bool {
        self.relationship_type == RelationshipType::Child
    }

    pub fn is_parent(&self) -> bool {
        self.relationship_type == RelationshipType::Parent
    }
}

/// The lifecycle status of a directive.
///
/// `Draft` → any working status → `Completed`. Working statuses may move
/// freely among themselves; `Completed` is terminal and only reachable
/// through the completion guard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveStatus {
    Draft,
    Active,
    InProgress,
    PendingApproval,
    Review,
    Completed,
}

impl DirectiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::PendingApproval => "pending_approval",
            Self::Review => "review",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "in_progress" => Some(Self::InProgress),
            "pending_approval" => Some(Self::PendingApproval),
            "review" => Some(Self::Review),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Statuses between draft and completed.
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::InProgress | Self::PendingApproval | Self::Review
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::Completed
    }

    /// Whether `self → target` is an edge of the directive state machine that
    /// a plain transition may take. Completion goes through the guard instead.
    pub fn can_transition_to(&self, target: DirectiveStatus) -> bool {
        match self {
            Self::Draft => target.is_working(),
            s if s.is_working() => target.is_working(),
            _ => false,
        }
    }
}

impl std::fmt::Display for DirectiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a directive in the hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Standalone,
    Parent,
    Child,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Parent => "parent",
            Self::Child => "child",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "standalone" => Some(Self::Standalone),
            "parent" => Some(Self::Parent),
            "child" => Some(Self::Child),
            _ => None,
        }
    }
}

/// Directive priority. Drives the weight a child carries in its parent's progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Aggregation weight of a child with this priority.
    pub fn weight(&self) -> u32 {
        match self {
            Self::Critical => 40,
            Self::High => 30,
            Self::Medium => 20,
            Self::Low => 10,
        }
    }
}

/// Input for creating a directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDirectiveInput {
    pub key: String,
    pub title: String,
    pub declared_type: String,
    /// Defaults to `Medium`.
    pub priority: Option<Priority>,
    /// Creates the directive as a child appended to this parent's chain.
    pub parent_id: Option<Uuid>,
}

/// One child in a bulk decomposition request. Children are chained in the order given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChildInput {
    pub key: String,
    pub title: String,
    /// Defaults to the parent's declared type.
    pub declared_type: Option<String>,
    pub priority: Option<Priority>,
}

/// Input for decomposing a parent into an ordered chain of children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChildrenInput {
    pub children: Vec<CreateChildInput>,
}

/// Fully resolved row ready to be inserted as a child.
#[derive(Debug, Clone)]
pub struct NewChild {
    pub id: Uuid,
    pub key: String,
    pub title: String,
    pub declared_type: String,
    pub priority: Priority,
    pub depends_on: Option<Uuid>,
}

/// Body of `POST /transition/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionInput {
    pub target_status: DirectiveStatus,
}

/// A compare-and-set status write.
///
/// Applied only if the directive is still in `expected`, its predecessor (if any)
/// is completed, and, when `require_children_complete` is set, none of its
/// children is outstanding.
#[derive(Debug, Clone, Copy)]
pub struct StatusUpdate {
    pub id: Uuid,
    pub expected: DirectiveStatus,
    pub target: DirectiveStatus,
    pub require_children_complete: bool,
}
