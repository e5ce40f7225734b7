//! Console command catalog expressed as a small grammar AST.
//!
//! The parser walks these nodes and the help renderer reads the usage and
//! summary strings, so keywords and argument layouts stay in one place.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    On,
    Off,
    Status,
    Wait,
    Fault,
    Hardpoint,
    Pwm,
    Button,
    History,
    Help,
}

/// Keywords accepted by `fault`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeywordTag {
    FaultTimeout,
    FaultOvervoltage,
    FaultSupplyLow,
    FaultSupplyHigh,
    FaultOvercurrent,
    FaultRange,
    FaultClear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeywordBranch {
    pub keyword: &'static str,
    pub tag: KeywordTag,
}

/// Shape of a single argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSpec {
    /// Unsigned integer no larger than `max`.
    Integer { label: &'static str, max: u32 },
    /// Literal ending in `ms` or `s`.
    Duration,
    /// One of a fixed set of identifiers.
    Keyword(&'static [KeywordBranch]),
}

impl ValueSpec {
    /// Label used in error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ValueSpec::Integer { label, .. } => label,
            ValueSpec::Duration => "duration",
            ValueSpec::Keyword(branches) => match branches.first() {
                Some(branch) => branch.keyword,
                None => "keyword",
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    End,
    Value {
        spec: ValueSpec,
        optional: bool,
        next: &'static Node,
    },
    Topic {
        next: &'static Node,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub grammar: &'static Node,
    pub usage: &'static str,
    pub summary: &'static str,
}

const END: Node = Node::End;

const ON_GRAMMAR: Node = Node::Value {
    spec: ValueSpec::Integer {
        label: "repetitions",
        max: u16::MAX as u32,
    },
    optional: true,
    next: &END,
};

const WAIT_GRAMMAR: Node = Node::Value {
    spec: ValueSpec::Duration,
    optional: false,
    next: &END,
};

const FAULT_KEYWORDS: [KeywordBranch; 7] = [
    KeywordBranch {
        keyword: "timeout",
        tag: KeywordTag::FaultTimeout,
    },
    KeywordBranch {
        keyword: "overvoltage",
        tag: KeywordTag::FaultOvervoltage,
    },
    KeywordBranch {
        keyword: "supply-low",
        tag: KeywordTag::FaultSupplyLow,
    },
    KeywordBranch {
        keyword: "supply-high",
        tag: KeywordTag::FaultSupplyHigh,
    },
    KeywordBranch {
        keyword: "overcurrent",
        tag: KeywordTag::FaultOvercurrent,
    },
    KeywordBranch {
        keyword: "range",
        tag: KeywordTag::FaultRange,
    },
    KeywordBranch {
        keyword: "clear",
        tag: KeywordTag::FaultClear,
    },
];

const FAULT_GRAMMAR: Node = Node::Value {
    spec: ValueSpec::Keyword(&FAULT_KEYWORDS),
    optional: false,
    next: &END,
};

const HARDPOINT_COMMAND: Node = Node::Value {
    spec: ValueSpec::Integer {
        label: "command",
        max: u16::MAX as u32,
    },
    optional: false,
    next: &END,
};

const HARDPOINT_GRAMMAR: Node = Node::Value {
    spec: ValueSpec::Integer {
        label: "hardpoint id",
        max: u8::MAX as u32,
    },
    optional: false,
    next: &HARDPOINT_COMMAND,
};

const PWM_GRAMMAR: Node = Node::Value {
    spec: ValueSpec::Integer {
        label: "pulse width",
        max: u16::MAX as u32,
    },
    optional: false,
    next: &END,
};

/// Most events `history` prints at once.
pub const HISTORY_MAX: u8 = 12;

const HISTORY_GRAMMAR: Node = Node::Value {
    spec: ValueSpec::Integer {
        label: "count",
        max: HISTORY_MAX as u32,
    },
    optional: true,
    next: &END,
};

const HELP_GRAMMAR: Node = Node::Topic { next: &END };

const COMMANDS: [CommandSpec; 10] = [
    CommandSpec {
        name: "on",
        tag: CommandTag::On,
        grammar: &ON_GRAMMAR,
        usage: "on [repetitions]",
        summary: "magnetize; repetitions are clamped to the configured range",
    },
    CommandSpec {
        name: "off",
        tag: CommandTag::Off,
        grammar: &END,
        usage: "off",
        summary: "run the demagnetizing ramp",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        grammar: &END,
        usage: "status",
        summary: "show magnet state, health, and status flags",
    },
    CommandSpec {
        name: "wait",
        tag: CommandTag::Wait,
        grammar: &WAIT_GRAMMAR,
        usage: "wait <duration>",
        summary: "advance the clock, polling the controller every tick",
    },
    CommandSpec {
        name: "fault",
        tag: CommandTag::Fault,
        grammar: &FAULT_GRAMMAR,
        usage: "fault <timeout|overvoltage|supply-low|supply-high|overcurrent|range|clear>",
        summary: "fail the next charger session with the given flag",
    },
    CommandSpec {
        name: "hardpoint",
        tag: CommandTag::Hardpoint,
        grammar: &HARDPOINT_GRAMMAR,
        usage: "hardpoint <id> <command>",
        summary: "deliver a remote hardpoint command (0 releases)",
    },
    CommandSpec {
        name: "pwm",
        tag: CommandTag::Pwm,
        grammar: &PWM_GRAMMAR,
        usage: "pwm <microseconds>",
        summary: "feed an RC pulse width",
    },
    CommandSpec {
        name: "button",
        tag: CommandTag::Button,
        grammar: &END,
        usage: "button",
        summary: "press the toggle button",
    },
    CommandSpec {
        name: "history",
        tag: CommandTag::History,
        grammar: &HISTORY_GRAMMAR,
        usage: "history [count]",
        summary: "show the most recent magnet events",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        grammar: &HELP_GRAMMAR,
        usage: "help [command]",
        summary: "list commands or describe one",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

/// Finds a keyword branch by name (case insensitive).
#[must_use]
pub fn find_keyword(
    branches: &'static [KeywordBranch],
    keyword: &str,
) -> Option<&'static KeywordBranch> {
    branches
        .iter()
        .find(|branch| branch.keyword.eq_ignore_ascii_case(keyword))
}
