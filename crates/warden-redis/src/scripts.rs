// Server-side compare-and-write scripts

use std::sync::LazyLock;

use redis::Script;

/// Reset the expiry only while the key still holds the caller's lock id
static EXTEND: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#,
    )
});

/// Delete the key only while it still holds the caller's lock id
static RELEASE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#,
    )
});

pub(crate) fn extend() -> &'static Script {
    &EXTEND
}

pub(crate) fn release() -> &'static Script {
    &RELEASE
}
