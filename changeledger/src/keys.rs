/// Key construction for the Redis layout.
///
/// ```text
/// {prefix}:table:{table}               table descriptor (JSON)
/// {prefix}:table:{table}:item:{key}    one item (JSON attribute map)
/// ```
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub prefix: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self { prefix }
    }

    pub fn table(&self, table: &str) -> String {
        format!("{}:table:{}", self.prefix, table)
    }

    /// Prefix shared by every item key of `table`; the partition value is appended.
    pub fn item_prefix(&self, table: &str) -> String {
        format!("{}:table:{}:item:", self.prefix, table)
    }

    pub fn item(&self, table: &str, key: &str) -> String {
        format!("{}{}", self.item_prefix(table), key)
    }

    /// `SCAN MATCH` pattern covering every item of `table`.
    pub fn item_pattern(&self, table: &str) -> String {
        format!("{}*", escape_glob(&self.item_prefix(table)))
    }
}

/// Escape Redis glob metacharacters so `literal` only matches itself.
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_table_and_item_keys() {
        let ctx = KeyContext::new("ledger");
        assert_eq!(ctx.table("changes"), "ledger:table:changes");
        assert_eq!(ctx.item("changes", "c1"), "ledger:table:changes:item:c1");
        assert_eq!(ctx.item_pattern("changes"), "ledger:table:changes:item:*");
    }

    /// Redis-style glob match (`*`, `?`, `[...]`, `\\` escapes), enough to check patterns.
    fn glob_matches(pattern: &[char], text: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('*', rest)) => (0..=text.len()).any(|skip| glob_matches(rest, &text[skip..])),
            Some(('?', rest)) => !text.is_empty() && glob_matches(rest, &text[1..]),
            Some(('\\', rest)) => match (rest.split_first(), text.split_first()) {
                (Some((p, rest)), Some((t, text))) => p == t && glob_matches(rest, text),
                _ => false,
            },
            Some(('[', rest)) => {
                let Some(close) = rest.iter().position(|c| *c == ']') else {
                    return false;
                };
                !text.is_empty() && rest[..close].contains(&text[0]) && glob_matches(&rest[close + 1..], &text[1..])
            }
            Some((p, rest)) => text.first() == Some(p) && glob_matches(rest, &text[1..]),
        }
    }

    fn pattern_covers(pattern: &str, key: &str) -> bool {
        let pattern: Vec<char> = pattern.chars().collect();
        let key: Vec<char> = key.chars().collect();
        glob_matches(&pattern, &key)
    }

    #[test]
    fn pattern_escapes_glob_characters_in_prefix() {
        let ctx = KeyContext::new("app[1]");
        assert_eq!(ctx.item_pattern("changes"), "app\\[1\\]:table:changes:item:*");
        assert!(pattern_covers(&ctx.item_pattern("changes"), &ctx.item("changes", "c1")));
        assert!(!pattern_covers(&ctx.item_pattern("changes"), "app1:table:changes:item:c1"));

        for prefix in ["a*b", "who?", "back\\slash", "plain"] {
            let ctx = KeyContext::new(prefix);
            assert!(pattern_covers(&ctx.item_pattern("t"), &ctx.item("t", "c1")), "{prefix}");
        }
        let wild = KeyContext::new("a*b");
        assert!(!pattern_covers(&wild.item_pattern("t"), "aXXb:table:t:item:c1"));
    }

    #[test]
    fn descriptor_key_is_outside_item_pattern() {
        let ctx = KeyContext::new("ledger");
        let pattern_prefix = ctx.item_pattern("changes").trim_end_matches('*').to_string();
        assert!(!ctx.table("changes").starts_with(&pattern_prefix));
    }
}
