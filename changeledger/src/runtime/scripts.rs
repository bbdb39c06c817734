use redis::Script;
use std::sync::LazyLock;

pub const CONDITIONAL_PUT_SCRIPT_BODY: &str = include_str!("../../lua/conditional_put.lua");

pub static CONDITIONAL_PUT_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(CONDITIONAL_PUT_SCRIPT_BODY));
