//! Core model types: operation codes, target types, decisions.
//!
//! `OperationCode` and `TargetType` are closed enums. The persisted code
//! tables are decoded against them at the storage boundary, so an unknown
//! integer code never reaches the decision engine.

/// Entity identifier as used by the surrounding identity system
/// (accounts, groups, hosts, disks, OUs share one id space).
pub type EntityId = i64;

/// A registry-defined capability an operator may hold on a target.
///
/// The integer codes are stable reference data, minted once by the
/// administrative import tooling and treated as read-only here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OperationCode {
    CreateUser = 1,
    RemoveUser = 2,
    SetPassword = 3,
    SetGecos = 4,
    MoveFromDisk = 5,
    MoveToDisk = 6,
    AddDisks = 7,
    CreateHost = 8,
    CreateGroup = 9,
    AlterGroupMembership = 10,
    ModifySpread = 11,
    AlterPrinterQuota = 12,
    DiskQuotaSet = 13,
    DiskQuotaShow = 14,
    DiskQuotaForever = 15,
    DiskQuotaUnlimited = 16,
    ViewHistory = 17,
    ViewStudentInfo = 18,
    EmailCreate = 19,
    EmailDelete = 20,
    EmailForwardOff = 21,
    EmailVacationOff = 22,
    EmailMigrate = 23,
    EmailQuotaSet = 24,
}

impl OperationCode {
    /// All codes, in stable code order.
    pub const ALL: [OperationCode; 24] = [
        OperationCode::CreateUser,
        OperationCode::RemoveUser,
        OperationCode::SetPassword,
        OperationCode::SetGecos,
        OperationCode::MoveFromDisk,
        OperationCode::MoveToDisk,
        OperationCode::AddDisks,
        OperationCode::CreateHost,
        OperationCode::CreateGroup,
        OperationCode::AlterGroupMembership,
        OperationCode::ModifySpread,
        OperationCode::AlterPrinterQuota,
        OperationCode::DiskQuotaSet,
        OperationCode::DiskQuotaShow,
        OperationCode::DiskQuotaForever,
        OperationCode::DiskQuotaUnlimited,
        OperationCode::ViewHistory,
        OperationCode::ViewStudentInfo,
        OperationCode::EmailCreate,
        OperationCode::EmailDelete,
        OperationCode::EmailForwardOff,
        OperationCode::EmailVacationOff,
        OperationCode::EmailMigrate,
        OperationCode::EmailQuotaSet,
    ];

    /// The persisted integer code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Resolves a persisted integer code. Returns `None` for codes this
    /// build does not know, which callers must treat as a decode failure.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// The symbolic name used in grants, logs and denial messages.
    pub fn name(self) -> &'static str {
        match self {
            OperationCode::CreateUser => "create_user",
            OperationCode::RemoveUser => "remove_user",
            OperationCode::SetPassword => "set_password",
            OperationCode::SetGecos => "set_gecos",
            OperationCode::MoveFromDisk => "move_from_disk",
            OperationCode::MoveToDisk => "move_to_disk",
            OperationCode::AddDisks => "add_disks",
            OperationCode::CreateHost => "create_host",
            OperationCode::CreateGroup => "create_group",
            OperationCode::AlterGroupMembership => "alter_group_membership",
            OperationCode::ModifySpread => "modify_spread",
            OperationCode::AlterPrinterQuota => "alter_printer_quota",
            OperationCode::DiskQuotaSet => "disk_quota_set",
            OperationCode::DiskQuotaShow => "disk_quota_show",
            OperationCode::DiskQuotaForever => "disk_quota_forever",
            OperationCode::DiskQuotaUnlimited => "disk_quota_unlimited",
            OperationCode::ViewHistory => "view_history",
            OperationCode::ViewStudentInfo => "view_student_info",
            OperationCode::EmailCreate => "email_create",
            OperationCode::EmailDelete => "email_delete",
            OperationCode::EmailForwardOff => "email_forward_off",
            OperationCode::EmailVacationOff => "email_vacation_off",
            OperationCode::EmailMigrate => "email_migrate",
            OperationCode::EmailQuotaSet => "email_quota_set",
        }
    }

    /// Resolves a symbolic name, for grant tooling that works with names.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Human description for listings.
    pub fn description(self) -> &'static str {
        match self {
            OperationCode::CreateUser => "create user accounts",
            OperationCode::RemoveUser => "remove user accounts",
            OperationCode::SetPassword => "set account passwords",
            OperationCode::SetGecos => "set account gecos field",
            OperationCode::MoveFromDisk => "move users away from disk",
            OperationCode::MoveToDisk => "move users to disk",
            OperationCode::AddDisks => "add user disks to hosts",
            OperationCode::CreateHost => "create hosts",
            OperationCode::CreateGroup => "create groups",
            OperationCode::AlterGroupMembership => "alter group memberships",
            OperationCode::ModifySpread => "modify spreads",
            OperationCode::AlterPrinterQuota => "alter printer quota",
            OperationCode::DiskQuotaSet => "set disk quota",
            OperationCode::DiskQuotaShow => "show disk quota",
            OperationCode::DiskQuotaForever => "set permanent disk quota override",
            OperationCode::DiskQuotaUnlimited => "set unlimited disk quota",
            OperationCode::ViewHistory => "view entity history",
            OperationCode::ViewStudentInfo => "view student information",
            OperationCode::EmailCreate => "create e-mail targets",
            OperationCode::EmailDelete => "delete e-mail targets",
            OperationCode::EmailForwardOff => "disable e-mail forwarding",
            OperationCode::EmailVacationOff => "disable e-mail vacation notice",
            OperationCode::EmailMigrate => "migrate e-mail accounts",
            OperationCode::EmailQuotaSet => "set e-mail quota",
        }
    }
}

impl std::fmt::Display for OperationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The category an operation target describes.
///
/// Global categories carry no entity id and cover every resource of their
/// kind; concrete categories identify one host, disk, group, OU, maildomain
/// or spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TargetType {
    Disk = 1,
    Host = 2,
    Group = 3,
    Ou = 4,
    Maildomain = 5,
    Spread = 6,
    GlobalHost = 101,
    GlobalGroup = 102,
    GlobalOu = 103,
    GlobalMaildomain = 104,
    GlobalSpread = 105,
}

impl TargetType {
    pub const ALL: [TargetType; 11] = [
        TargetType::Disk,
        TargetType::Host,
        TargetType::Group,
        TargetType::Ou,
        TargetType::Maildomain,
        TargetType::Spread,
        TargetType::GlobalHost,
        TargetType::GlobalGroup,
        TargetType::GlobalOu,
        TargetType::GlobalMaildomain,
        TargetType::GlobalSpread,
    ];

    /// The persisted integer code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Resolves a persisted integer code.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            TargetType::Disk => "disk",
            TargetType::Host => "host",
            TargetType::Group => "group",
            TargetType::Ou => "ou",
            TargetType::Maildomain => "maildomain",
            TargetType::Spread => "spread",
            TargetType::GlobalHost => "global_host",
            TargetType::GlobalGroup => "global_group",
            TargetType::GlobalOu => "global_ou",
            TargetType::GlobalMaildomain => "global_maildomain",
            TargetType::GlobalSpread => "global_spread",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// True for the categories that carry no entity id.
    pub fn is_global(self) -> bool {
        matches!(
            self,
            TargetType::GlobalHost
                | TargetType::GlobalGroup
                | TargetType::GlobalOu
                | TargetType::GlobalMaildomain
                | TargetType::GlobalSpread
        )
    }

    /// The global category that subsumes this concrete category during
    /// decision short-circuiting. Disks resolve through their owning host,
    /// so both disk and host map to global_host. Spread grants are always
    /// per-spread; no global short-circuit applies.
    pub fn global_counterpart(self) -> Option<TargetType> {
        match self {
            TargetType::Disk | TargetType::Host => Some(TargetType::GlobalHost),
            TargetType::Group => Some(TargetType::GlobalGroup),
            TargetType::Ou => Some(TargetType::GlobalOu),
            TargetType::Maildomain => Some(TargetType::GlobalMaildomain),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete resource a check is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRef {
    Disk(EntityId),
    Host(EntityId),
    Group(EntityId),
    Ou(EntityId),
    Maildomain(EntityId),
    /// Spread targets use the spread's integer code value as the entity id.
    Spread(EntityId),
}

impl TargetRef {
    pub fn target_type(self) -> TargetType {
        match self {
            TargetRef::Disk(_) => TargetType::Disk,
            TargetRef::Host(_) => TargetType::Host,
            TargetRef::Group(_) => TargetType::Group,
            TargetRef::Ou(_) => TargetType::Ou,
            TargetRef::Maildomain(_) => TargetType::Maildomain,
            TargetRef::Spread(_) => TargetType::Spread,
        }
    }

    pub fn entity_id(self) -> EntityId {
        match self {
            TargetRef::Disk(id)
            | TargetRef::Host(id)
            | TargetRef::Group(id)
            | TargetRef::Ou(id)
            | TargetRef::Maildomain(id)
            | TargetRef::Spread(id) => id,
        }
    }
}

/// How a check result is to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Authoritative check guarding a mutating command. Denials carry a
    /// reason and are surfaced to the operator.
    Enforce,
    /// "Does the operator hold this operation anywhere" probe used to hide
    /// inapplicable commands from listings. Never a security boundary.
    QueryAny,
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// The reason is present in Enforce mode and absent in QueryAny mode.
    Denied { reason: Option<String> },
}

impl Decision {
    /// Denial with an administrator-facing reason (Enforce mode).
    pub fn denied(reason: impl Into<String>) -> Self {
        Decision::Denied {
            reason: Some(reason.into()),
        }
    }

    /// Reasonless denial (QueryAny mode).
    pub fn not_held() -> Self {
        Decision::Denied { reason: None }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Converts an Enforce-mode decision into the caller-facing result,
    /// mapping a denial to [`DomainError::PermissionDenied`].
    pub fn into_result(self) -> crate::error::DomainResult<()> {
        match self {
            Decision::Allowed => Ok(()),
            Decision::Denied { reason } => Err(crate::error::DomainError::PermissionDenied {
                reason: reason.unwrap_or_else(|| "permission denied".to_string()),
            }),
        }
    }
}

/// One row produced by the grant join: a principal holds `op_id` (inside
/// some operation set) on `target_id`. Carries both attribute sets so the
/// engine can apply the wildcard law and the hierarchy patterns without a
/// second round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantMatch {
    pub target_id: EntityId,
    pub op_id: EntityId,
    /// Attributes on the operation entry inside the matched set. Empty
    /// means the operation applies to all attribute values.
    pub op_attrs: Vec<String>,
    /// Attributes on the operation target (e.g. disk-name patterns on a
    /// host-scoped target). Empty unless the target row has `has_attr`.
    pub target_attrs: Vec<String>,
}

/// Disk metadata needed for hierarchical resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub disk_id: EntityId,
    pub host_id: EntityId,
    /// Full mount path, e.g. "/uio/lab-3/u1".
    pub path: String,
}

impl DiskInfo {
    /// The final path segment, the piece host-scoped attribute patterns
    /// are matched against.
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}
