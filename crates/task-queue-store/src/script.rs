use crate::{Keyspace, Result, StoreError};
use redis::Value;
use std::str::FromStr;

/// In-process body of a script, run by [`crate::MemoryStore`] while it holds
/// the keyspace lock.
pub type NativeFn = fn(&mut Keyspace, &ScriptArgs<'_>) -> Result<Value>;

/// A named unit of work that the store runs atomically.
///
/// Redis runs `source` as a Lua script; the in-memory store runs `native`.
/// Both bodies must leave the keyspace in the same state.
pub struct Script {
    name: &'static str,
    source: &'static str,
    native: NativeFn,
}

impl Script {
    pub const fn new(name: &'static str, source: &'static str, native: NativeFn) -> Self {
        Script {
            name,
            source,
            native,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Lua source executed by Redis
    pub fn source(&self) -> &'static str {
        self.source
    }

    pub(crate) fn run_native(
        &self,
        keyspace: &mut Keyspace,
        keys: &[String],
        args: &[String],
    ) -> Result<Value> {
        let call = ScriptArgs {
            script: self.name,
            keys,
            args,
        };
        (self.native)(keyspace, &call)
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script").field("name", &self.name).finish()
    }
}

/// KEYS and ARGV of one script invocation
pub struct ScriptArgs<'a> {
    script: &'static str,
    keys: &'a [String],
    args: &'a [String],
}

impl<'a> ScriptArgs<'a> {
    pub fn keys(&self) -> &'a [String] {
        self.keys
    }

    pub fn args(&self) -> &'a [String] {
        self.args
    }

    pub fn key(&self, index: usize) -> Result<&'a str> {
        self.keys
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| self.fail(format!("missing KEYS[{}]", index + 1)))
    }

    pub fn arg(&self, index: usize) -> Result<&'a str> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| self.fail(format!("missing ARGV[{}]", index + 1)))
    }

    /// Parse ARGV at `index`
    pub fn parse<T: FromStr>(&self, index: usize) -> Result<T> {
        let raw = self.arg(index)?;
        raw.parse()
            .map_err(|_| self.fail(format!("ARGV[{}] is not valid: {:?}", index + 1, raw)))
    }

    pub fn fail(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Script {
            script: self.script,
            reason: reason.into(),
        }
    }
}
