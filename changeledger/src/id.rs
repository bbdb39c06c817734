use log::debug;
use nanoid::nanoid;

/// Lowercase alphanumerics; execution ids end up in logs and CLI tables.
const EXECUTION_ID_ALPHABET: &[char] = &[
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'j', 'k', 'm', 'n', 'p',
    'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
const EXECUTION_ID_LENGTH: usize = 16;

/// Generates an identifier for one migration run.
pub fn generate_execution_id() -> String {
    format!("exec-{}", nanoid!(EXECUTION_ID_LENGTH, EXECUTION_ID_ALPHABET))
}

/// Name of the machine running this process, empty if the OS will not say.
pub fn execution_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(err) => {
            debug!("could not determine hostname: {err}");
            String::new()
        }
    }
}

/// Lock owner id: hostname plus a random suffix, so two runs on one host differ.
pub fn generate_lock_owner() -> String {
    let host = execution_hostname();
    let suffix = nanoid!(EXECUTION_ID_LENGTH, EXECUTION_ID_ALPHABET);
    if host.is_empty() { suffix } else { format!("{host}-{suffix}") }
}
