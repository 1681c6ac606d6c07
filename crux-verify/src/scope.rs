#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use crux_ast::{FunctionDef, NodeId, Param, Span};

use crate::error::VerifyError;
use crate::intrinsic::{Intrinsic, INTRINSIC_PREFIX};
use crate::registry::ModuleInfo;

/// One lexical frame: parameter name -> parameter identity.
///
/// Frames link to their parent by reference, so a child lives exactly as long
/// as the construct that introduced it.
#[derive(Debug, Default)]
pub struct Scope<'p> {
    frame: HashMap<String, NodeId>,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    pub fn root() -> Scope<'static> {
        Scope::default()
    }

    pub fn child<'a>(&'a self, params: &[Param]) -> Scope<'a> {
        Scope {
            frame: params.iter().map(|p| (p.name.node.clone(), p.id)).collect(),
            parent: Some(self),
        }
    }

    /// Innermost binding wins.
    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(id) = s.frame.get(name) {
                return Some(*id);
            }
            scope = s.parent;
        }
        None
    }

    pub fn depth(&self) -> usize {
        let mut n = 0;
        let mut scope = self.parent;
        while let Some(s) = scope {
            n += 1;
            scope = s.parent;
        }
        n
    }
}

#[derive(Clone, Debug)]
pub enum Resolution<'r> {
    /// Shadowed language builtin, defined as `_builtin_<name>`.
    Builtin(&'r Arc<FunctionDef>),
    /// Pure definition from a registered module.
    Pure(&'r Arc<FunctionDef>),
    Intrinsic(Intrinsic),
    /// Function or lambda parameter.
    Local(NodeId),
    Unresolved,
}

/// Resolves names against the registry, the intrinsic table and the scope
/// chain, in that order of precedence for plain names.
#[derive(Clone, Copy)]
pub struct Resolver<'r> {
    defs: &'r ModuleInfo,
}

impl<'r> Resolver<'r> {
    pub fn new(defs: &'r ModuleInfo) -> Self {
        Self { defs }
    }

    pub fn resolve(&self, name: &str, span: Span, scope: &Scope<'_>) -> Result<Resolution<'r>, VerifyError> {
        if let Some(rest) = name.strip_prefix(INTRINSIC_PREFIX) {
            return resolve_intrinsic(name, rest, span).map(Resolution::Intrinsic);
        }
        if !name.starts_with('_') {
            if let Some(def) = self.defs.definition(&format!("_builtin_{name}")) {
                return Ok(Resolution::Builtin(def));
            }
            if let Some(def) = self.defs.definition(name) {
                return Ok(Resolution::Pure(def));
            }
            return Ok(scope.lookup(name).map_or(Resolution::Unresolved, Resolution::Local));
        }
        if let Some(id) = scope.lookup(name) {
            return Ok(Resolution::Local(id));
        }
        Ok(self
            .defs
            .definition(name)
            .map_or(Resolution::Unresolved, Resolution::Pure))
    }
}

fn resolve_intrinsic(full: &str, rest: &str, span: Span) -> Result<Intrinsic, VerifyError> {
    let mut chars = rest.chars();
    let Some(first) = chars.next().filter(|c| !c.is_uppercase()) else {
        return Err(VerifyError::definition(format!("invalid intrinsic: \"{full}\""), span));
    };
    let capitalised: String = first.to_uppercase().chain(chars).collect();
    Intrinsic::lookup(&capitalised)
        .ok_or_else(|| VerifyError::definition(format!("unknown intrinsic: \"{full}\""), span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crux_ast::{ident, synthetic_span};
    use crux_parse::parse_module;

    fn defs() -> ModuleInfo {
        let mut m = ModuleInfo::new();
        m.add_module(
            parse_module(
                "def _builtin_len(l): return ...\n\
                 def isint(x): return _z_wrapbool(_z_isint(x))\n\
                 def _op_Add(a, b): return ...\n",
            )
            .unwrap(),
        )
        .unwrap();
        m
    }

    fn params(names: &[&str]) -> Vec<Param> {
        names.iter().map(|n| Param::new(ident(*n), None)).collect()
    }

    #[test]
    fn inner_frames_shadow_outer_ones() {
        let outer_params = params(&["x", "y"]);
        let inner_params = params(&["x"]);
        let root = Scope::root();
        let outer = root.child(&outer_params);
        let inner = outer.child(&inner_params);
        assert_eq!(inner.lookup("x"), Some(inner_params[0].id));
        assert_eq!(inner.lookup("y"), Some(outer_params[1].id));
        assert_eq!(outer.lookup("x"), Some(outer_params[0].id));
        assert_eq!(inner.lookup("z"), None);
        assert_eq!(inner.depth(), 2);
    }

    #[test]
    fn builtins_shadow_then_pure_then_locals() {
        let defs = defs();
        let r = Resolver::new(&defs);
        let ps = params(&["len", "isint", "q"]);
        let root = Scope::root();
        let scope = root.child(&ps);
        let sp = synthetic_span();
        assert!(matches!(r.resolve("len", sp, &scope).unwrap(), Resolution::Builtin(d) if d.name.node == "_builtin_len"));
        assert!(matches!(r.resolve("isint", sp, &scope).unwrap(), Resolution::Pure(_)));
        assert!(matches!(r.resolve("q", sp, &scope).unwrap(), Resolution::Local(id) if id == ps[2].id));
        assert!(matches!(r.resolve("nope", sp, &scope).unwrap(), Resolution::Unresolved));
    }

    #[test]
    fn underscore_names_prefer_locals_then_registry() {
        let defs = defs();
        let r = Resolver::new(&defs);
        let ps = params(&["_op_Add"]);
        let root = Scope::root();
        let sp = synthetic_span();
        assert!(matches!(r.resolve("_op_Add", sp, &root).unwrap(), Resolution::Pure(_)));
        assert!(matches!(r.resolve("_op_Add", sp, &root.child(&ps)).unwrap(), Resolution::Local(_)));
    }

    #[test]
    fn intrinsics_must_start_lower_case() {
        let defs = defs();
        let r = Resolver::new(&defs);
        let root = Scope::root();
        let sp = synthetic_span();
        assert!(matches!(
            r.resolve("_z_wrapbool", sp, &root).unwrap(),
            Resolution::Intrinsic(Intrinsic::Wrapbool)
        ));
        let err = r.resolve("_z_Wrapbool", sp, &root).unwrap_err();
        assert!(err.to_string().contains("invalid intrinsic"), "{err}");
        let err = r.resolve("_z_frobnicate", sp, &root).unwrap_err();
        assert!(err.to_string().contains("unknown intrinsic"), "{err}");
        assert!(r.resolve("_z_", sp, &root).is_err());
    }
}
