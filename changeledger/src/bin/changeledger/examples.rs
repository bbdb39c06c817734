use crate::commands::{entries, init, lock, record};

#[derive(Clone, Copy)]
pub struct ExampleGroup {
    pub title: &'static str,
    pub commands: &'static [&'static str],
}

#[derive(Clone, Copy)]
pub struct CommandExample {
    pub name: &'static str,
    pub groups: &'static [ExampleGroup],
}

pub fn command_examples() -> &'static [CommandExample] {
    &[
        CommandExample {
            name: "init",
            groups: init::EXAMPLES,
        },
        CommandExample {
            name: "log",
            groups: entries::LOG_EXAMPLES,
        },
        CommandExample {
            name: "show",
            groups: entries::SHOW_EXAMPLES,
        },
        CommandExample {
            name: "record",
            groups: record::EXAMPLES,
        },
        CommandExample {
            name: "lock",
            groups: lock::EXAMPLES,
        },
    ]
}
