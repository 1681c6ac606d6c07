#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use crux_ast::{ident, Expr, FunctionDef, Module, NodeId, Param};
use crux_parse::parse_module;
use crux_rewrite::{RewriteEngine, RewriteRule};
use tracing::debug;

use crate::error::VerifyError;
use crate::normalize::Normalizer;

/// Pure definitions every registry starts from.
pub const PRELUDE: &str = include_str!("prelude.crux");

const ASSERT_PREFIX: &str = "_assert_";
const ASSERTDEF_PREFIX: &str = "_assertdef_";

/// Everything known about one function name.
#[derive(Clone, Debug)]
pub struct FnInfo {
    name: String,
    definition: Option<Arc<FunctionDef>>,
    assertions: Vec<Arc<FunctionDef>>,
    definitional_assertion: Option<Arc<FunctionDef>>,
}

impl FnInfo {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: None,
            assertions: Vec::new(),
            definitional_assertion: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> Option<&Arc<FunctionDef>> {
        self.definition.as_ref()
    }

    pub fn assertions(&self) -> &[Arc<FunctionDef>] {
        &self.assertions
    }

    pub fn definitional_assertion(&self) -> Option<&Arc<FunctionDef>> {
        self.definitional_assertion.as_ref()
    }

    fn set_definition(&mut self, def: FunctionDef) -> Result<(), VerifyError> {
        if self.definition.is_some() {
            return Err(VerifyError::definition(
                format!("multiply defined function: {}", self.name),
                def.name.span,
            ));
        }
        self.definitional_assertion = annotation_assertion(&def).map(Arc::new);
        self.definition = Some(Arc::new(def));
        Ok(())
    }
}

/// `_assertdef_f(params): return returns(f(params))`, or `isdefined(...)` when
/// only parameters are annotated. `None` when nothing is annotated.
fn annotation_assertion(def: &FunctionDef) -> Option<FunctionDef> {
    let annotated = def.params.iter().any(|p| p.annotation.is_some());
    if !annotated && def.returns.is_none() {
        return None;
    }
    let predicate = def.returns.clone().unwrap_or_else(|| Expr::name("isdefined"));
    let args = def.param_names().map(Expr::name).collect();
    let call = Expr::call(Expr::name(def.name.node.clone()), args);
    Some(FunctionDef {
        id: NodeId::fresh(),
        span: def.span,
        name: ident(format!("{ASSERTDEF_PREFIX}{}", def.name.node)),
        params: def
            .params
            .iter()
            .map(|p| Param::new(p.name.clone(), p.annotation.clone()))
            .collect(),
        returns: None,
        decorators: Vec::new(),
        body: Expr::call(predicate, vec![call]),
    })
}

/// Function table for the registered modules. The empty name collects
/// module-global assertions.
#[derive(Clone, Debug)]
pub struct ModuleInfo {
    functions: BTreeMap<String, FnInfo>,
}

impl Default for ModuleInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleInfo {
    pub fn new() -> Self {
        let mut functions = BTreeMap::new();
        functions.insert(String::new(), FnInfo::new(""));
        Self { functions }
    }

    /// Definitions first, then assertions, so an assertion may precede the
    /// function it talks about.
    pub fn add_module(&mut self, module: Module) -> Result<(), VerifyError> {
        let (assertions, definitions): (Vec<_>, Vec<_>) = module
            .functions
            .into_iter()
            .partition(|f| f.name.node.starts_with(ASSERT_PREFIX));
        for def in definitions {
            let name = def.name.node.clone();
            self.functions
                .entry(name.clone())
                .or_insert_with(|| FnInfo::new(name))
                .set_definition(def)?;
        }
        for assertion in assertions {
            let target = assertion.name.node[ASSERT_PREFIX.len()..].to_string();
            let Some(info) = self.functions.get_mut(&target) else {
                return Err(VerifyError::definition(
                    format!("assertion about unknown function: {target}"),
                    assertion.name.span,
                ));
            };
            info.assertions.push(Arc::new(assertion));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FnInfo> {
        self.functions.get(name)
    }

    /// Like [`ModuleInfo::get`], but an unknown name is an error.
    pub fn fn_info(&self, name: &str) -> Result<&FnInfo, VerifyError> {
        self.functions
            .get(name)
            .ok_or_else(|| VerifyError::definition(format!("unknown function: {name}"), None))
    }

    pub fn definition(&self, name: &str) -> Option<&Arc<FunctionDef>> {
        self.functions.get(name).and_then(FnInfo::definition)
    }

    pub fn global_assertions(&self) -> &[Arc<FunctionDef>] {
        self.functions.get("").map(FnInfo::assertions).unwrap_or_default()
    }

    /// In name order.
    pub fn functions(&self) -> impl Iterator<Item = &FnInfo> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.len() <= 1
    }
}

/// Immutable, shareable knowledge base: the function table plus the base
/// rewrite rules used to normalise predicate calls.
#[derive(Debug)]
pub struct Registry {
    defs: ModuleInfo,
    rules: RewriteEngine,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The prelude alone.
    pub fn prelude() -> Result<Registry, VerifyError> {
        Registry::builder().build()
    }

    pub fn defs(&self) -> &ModuleInfo {
        &self.defs
    }

    pub fn rules(&self) -> &RewriteEngine {
        &self.rules
    }
}

pub struct RegistryBuilder {
    prelude: bool,
    modules: Vec<Module>,
    rules: RewriteEngine,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            prelude: true,
            modules: Vec::new(),
            rules: RewriteEngine::new(),
        }
    }
}

impl RegistryBuilder {
    pub fn without_prelude(mut self) -> Self {
        self.prelude = false;
        self
    }

    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    pub fn source(self, src: &str) -> Result<Self, VerifyError> {
        Ok(self.module(parse_module(src)?))
    }

    pub fn rule(mut self, rule: RewriteRule) -> Self {
        self.rules.add_rule(rule);
        self
    }

    pub fn build(self) -> Result<Registry, VerifyError> {
        let mut defs = ModuleInfo::new();
        if self.prelude {
            defs.add_module(parse_module(PRELUDE)?)?;
        }
        for module in self.modules {
            defs.add_module(module)?;
        }

        // Definitional assertions are normalised once, up front.
        let mut normalized = Vec::new();
        {
            let normalizer = Normalizer::new(&defs, &self.rules);
            for info in defs.functions() {
                if let Some(da) = info.definitional_assertion() {
                    let body = normalizer.normalize(&da.body)?;
                    if body != da.body {
                        debug!(function = %info.name(), "normalised definitional assertion");
                        normalized.push((info.name().to_string(), body));
                    }
                }
            }
        }
        for (name, body) in normalized {
            if let Some(info) = defs.functions.get_mut(&name) {
                if let Some(da) = &mut info.definitional_assertion {
                    Arc::make_mut(da).body = body;
                }
            }
        }

        Ok(Registry {
            defs,
            rules: self.rules,
        })
    }
}
