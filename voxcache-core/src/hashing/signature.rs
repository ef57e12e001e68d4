//! Function signatures and argument binding for memoized calls.
//!
//! Binding follows the usual call rules: positionals fill parameters in
//! order, keywords fill by name, defaults fill the rest. Surplus positionals
//! land under `"*"` and surplus keywords under `"**"` when the signature
//! accepts them. Names on the ignore list are dropped before hashing.

use crate::error::HashError;
use crate::hashing::argument::Argument;
use std::collections::BTreeMap;

pub const VARARGS_KEY: &str = "*";
pub const VARKW_KEY: &str = "**";

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Argument>,
}

/// Name and parameter list of a memoizable function.
///
/// The name doubles as the function's identity in cache keys, so it should
/// be qualified (`"masking.smooth_img"` rather than `"smooth_img"`).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    name: String,
    params: Vec<Parameter>,
    varargs: bool,
    varkw: bool,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            varargs: false,
            varkw: false,
        }
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn param_with_default(mut self, name: impl Into<String>, default: impl Into<Argument>) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Accept surplus positional arguments under `"*"`.
    pub fn varargs(mut self) -> Self {
        self.varargs = true;
        self
    }

    /// Accept surplus keyword arguments under `"**"`.
    pub fn varkw(mut self) -> Self {
        self.varkw = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    fn accepts_name(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
            || (self.varargs && name == VARARGS_KEY)
            || (self.varkw && name == VARKW_KEY)
    }
}

/// An argument after binding, borrowed from the call or the signature.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundArg<'a> {
    One(&'a Argument),
    Many(Vec<&'a Argument>),
    Named(BTreeMap<&'a str, &'a Argument>),
}

/// Parameter name to bound argument, sorted by name.
pub type FilteredArgs<'a> = BTreeMap<&'a str, BoundArg<'a>>;

/// A function registered for memoization: its signature plus the argument
/// names excluded from cache keys.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoizedFunction {
    signature: FunctionSignature,
    ignore: Vec<String>,
}

impl MemoizedFunction {
    pub fn new(signature: FunctionSignature) -> Self {
        Self {
            signature,
            ignore: Vec::new(),
        }
    }

    pub fn ignore<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    /// Identity used as the first component of cache keys.
    pub fn function_id(&self) -> &str {
        self.signature.name()
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignore
    }

    /// Bind a call's arguments to parameter names and drop ignored ones.
    pub fn filter_args<'a>(
        &'a self,
        args: &'a [Argument],
        kwargs: &'a BTreeMap<String, Argument>,
    ) -> Result<FilteredArgs<'a>, HashError> {
        let sig = &self.signature;
        let function = || sig.name.clone();

        for name in &self.ignore {
            if !sig.accepts_name(name) {
                return Err(HashError::UnknownIgnored {
                    function: function(),
                    name: name.clone(),
                });
            }
        }

        if args.len() > sig.params.len() && !sig.varargs {
            return Err(HashError::TooManyPositional {
                function: function(),
                expected: sig.params.len(),
                given: args.len(),
            });
        }

        let mut bound: FilteredArgs<'a> = BTreeMap::new();
        for (i, param) in sig.params.iter().enumerate() {
            let keyword = kwargs.get(&param.name);
            let value = match (args.get(i), keyword) {
                (Some(_), Some(_)) => {
                    return Err(HashError::DuplicateArgument {
                        function: function(),
                        name: param.name.clone(),
                    });
                }
                (Some(v), None) | (None, Some(v)) => v,
                (None, None) => match &param.default {
                    Some(default) => default,
                    None => {
                        return Err(HashError::MissingArgument {
                            function: function(),
                            name: param.name.clone(),
                        });
                    }
                },
            };
            bound.insert(param.name.as_str(), BoundArg::One(value));
        }

        let mut extra_kwargs = BTreeMap::new();
        for (name, value) in kwargs {
            if sig.params.iter().any(|p| &p.name == name) {
                continue;
            }
            if !sig.varkw {
                return Err(HashError::UnexpectedKeyword {
                    function: function(),
                    name: name.clone(),
                });
            }
            extra_kwargs.insert(name.as_str(), value);
        }

        if sig.varargs {
            let surplus = args.iter().skip(sig.params.len()).collect();
            bound.insert(VARARGS_KEY, BoundArg::Many(surplus));
        }
        if sig.varkw {
            bound.insert(VARKW_KEY, BoundArg::Named(extra_kwargs));
        }

        for name in &self.ignore {
            bound.remove(name.as_str());
        }
        Ok(bound)
    }
}
