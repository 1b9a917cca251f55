//! Resolution of the net-net detail level for one Git command.
//!
//! The decision walks: explicit ruleset key from the command's params,
//! then nickname mapping, then the global default, then the builtin
//! default. A bare detail-level name short-circuits (detail levels apply
//! uniformly; no per-command lookup). A ruleset name goes through the
//! ruleset's command table with `exe:verb#mode` / `exe:verb` / `exe`
//! precedence before falling back to the ruleset default.
//!
//! Every step appends to a human-readable debug trail of the form
//! `[key -> value]/...` that is logged with the decision.

use std::collections::BTreeMap;

use crate::dataset::QualifiedNames;

use super::detail_level::{DetailLevel, DETAIL_LEVEL_DEFAULT_NAME};
use super::settings::FilterSettings;

/// Append one `[lval -> rval]` step to a debug trail.
fn debug_describe(base: &str, lval: &str, rval: &str) -> String {
    if base.is_empty() {
        format!("[{lval} -> {rval}]")
    } else {
        format!("{base}/[{lval} -> {rval}]")
    }
}

/// Use the builtin default detail level.
fn use_builtin_default(debug: &str) -> (DetailLevel, String) {
    (
        DetailLevel::DEFAULT,
        debug_describe(debug, "builtin-default", DETAIL_LEVEL_DEFAULT_NAME),
    )
}

impl FilterSettings {
    /// Try the ruleset key sent in a `def_param`.
    fn lookup_name_by_ruleset_key<'a>(
        &self,
        params: &'a BTreeMap<String, String>,
        debug: String,
    ) -> (Option<&'a str>, String) {
        if self.keynames.ruleset_key.is_empty() {
            return (None, debug);
        }

        match params.get(&self.keynames.ruleset_key) {
            Some(name) if !name.is_empty() => {
                let debug = debug_describe(&debug, "rskey", name);
                (Some(name.as_str()), debug)
            }
            _ => (None, debug),
        }
    }

    /// Try the nickname sent in a `def_param`, mapped through the
    /// nickname table.
    fn lookup_name_by_nickname(
        &self,
        params: &BTreeMap<String, String>,
        debug: String,
    ) -> (Option<&str>, String) {
        if self.keynames.nickname_key.is_empty() {
            return (None, debug);
        }

        let Some(nickname) = params
            .get(&self.keynames.nickname_key)
            .filter(|v| !v.is_empty())
        else {
            return (None, debug);
        };

        let debug = debug_describe(&debug, "nickname", nickname);

        match self.nicknames.get(nickname) {
            Some(name) if !name.is_empty() => {
                let debug = debug_describe(&debug, nickname, name);
                (Some(name.as_str()), debug)
            }
            _ => {
                let debug = debug_describe(&debug, nickname, "UNKNOWN");
                (None, debug)
            }
        }
    }

    /// Try the global default from the settings document.
    fn lookup_default_name(&self, debug: String) -> (Option<&str>, String) {
        if self.defaults.ruleset.is_empty() {
            return (None, debug);
        }
        let debug = debug_describe(&debug, "default-ruleset", &self.defaults.ruleset);
        (Some(self.defaults.ruleset.as_str()), debug)
    }

    /// Resolve the requested ruleset-or-detail-level name, first hit wins.
    fn lookup_name<'a>(
        &'a self,
        params: &'a BTreeMap<String, String>,
        debug: String,
    ) -> (Option<&'a str>, String) {
        let (name, debug) = self.lookup_name_by_ruleset_key(params, debug);
        if name.is_some() {
            return (name, debug);
        }
        let (name, debug) = self.lookup_name_by_nickname(params, debug);
        if name.is_some() {
            return (name, debug);
        }
        self.lookup_default_name(debug)
    }
}

/// Compute the detail level to use for this Git command, plus the debug
/// trail describing how it was chosen.
pub fn compute_detail_level(
    fs: Option<&FilterSettings>,
    params: &BTreeMap<String, String>,
    qn: &QualifiedNames,
) -> (DetailLevel, String) {
    let Some(fs) = fs else {
        // No filter settings at all; use the builtin default.
        return use_builtin_default("");
    };

    let (name, debug) = fs.lookup_name(params, String::new());
    let Some(name) = name else {
        return use_builtin_default(&debug);
    };

    // A bare detail-level name applies uniformly; no per-command lookup.
    if let Some(dl) = DetailLevel::from_name(name) {
        return (dl, debug);
    }

    let Some(rsdef) = fs.ruleset_defs.get(name) else {
        // Unknown ruleset name; note it and silently fall back.
        let debug = debug_describe(&debug, name, "INVALID");
        return use_builtin_default(&debug);
    };

    let debug = debug_describe(&debug, "command", &qn.exe_verb_mode);

    let Some((matched, dl_name)) = rsdef.lookup_command(qn) else {
        let debug = debug_describe(&debug, "ruleset-default", &rsdef.defaults.detail);
        let dl = DetailLevel::from_name(&rsdef.defaults.detail).unwrap_or(DetailLevel::DEFAULT);
        return (dl, debug);
    };

    let debug = debug_describe(&debug, matched, dl_name);

    if let Some(dl) = DetailLevel::from_name(dl_name) {
        return (dl, debug);
    }

    // Unreachable when the loader validated the ruleset, but force a sane
    // backstop rather than trusting that.
    let debug = debug_describe(&debug, "BACKSTOP", DETAIL_LEVEL_DEFAULT_NAME);
    (DetailLevel::DEFAULT, debug)
}
