use thiserror::Error;

use crate::diag::Span;

fn init_call_word(delegating: &bool) -> &'static str {
    if *delegating { "self.init" } else { "super.init" }
}

fn self_use_msg(name: &str, accessor: &bool, before_super_init: &bool) -> String {
    let what = if *accessor { "property" } else { "method" };
    let phase = if *before_super_init {
        "super.init is called"
    } else {
        "all stored properties are initialized"
    };
    format!("use of {} '{}' before {}", what, name, phase)
}

/// Diagnostics produced by definite-initialization checking.
///
/// Every variant carries the source span it reports against; the checker
/// resolves spanless instructions to the enclosing function's span before
/// constructing one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiDiagnostic {
    /// Note attached to partial-initialization errors, one per member.
    #[error("property '{0}' not initialized")]
    StoredPropertyNotInitialized(String, Span),

    #[error("variable '{0}' used before being initialized")]
    VariableUsedBeforeInitialized(String, Span),

    #[error("variable '{0}' passed by reference before being initialized")]
    VariableInOutBeforeInitialized(String, Span),

    #[error("variable '{0}' captured by a closure before being initialized")]
    VariableEscapeBeforeInitialized(String, Span),

    #[error("address of variable '{0}' taken before it is initialized")]
    VariableAddrTakenBeforeInitialized(String, Span),

    #[error("variable '{0}' used by function definition before being initialized")]
    GlobalVariableFunctionUseUninit(String, Span),

    #[error("struct '{0}' must be completely initialized before a member is stored to")]
    StructNotFullyInitialized(String, Span),

    #[error("immutable value '{0}' may only be initialized once")]
    ImmutablePropertyAlreadyInitialized(String, Span),

    #[error("immutable value '{0}' may not be passed inout")]
    ImmutablePropertyPassedInOut(String, Span),

    #[error("use of 'self' in delegating initializer before self.init is called")]
    SelfUseBeforeInitInDelegatingInit(Span),

    #[error("return from delegating initializer before self.init is called")]
    ReturnFromInitWithoutSelfInit(Span),

    #[error("return from enum initializer without storing to 'self'")]
    ReturnFromInitWithoutInitingSelf(Span),

    #[error("return from initializer without initializing all stored properties")]
    ReturnFromInitWithoutInitingStoredProperties(Span),

    /// Method or accessor called on `self` before it is fully set up.
    /// Fields: member name, is-accessor, is-before-super-init.
    #[error("{}", self_use_msg(.0, .1, .2))]
    SelfUseBeforeFullyInit(String, bool, bool, Span),

    #[error("'self' used before {} call", init_call_word(.0))]
    SelfBeforeSuperSelfInit(bool, Span),

    #[error("'self' used before all stored properties are initialized")]
    UseOfSelfBeforeFullyInit(Span),

    #[error("{} isn't called on all paths before returning from initializer", init_call_word(.0))]
    SuperSelfInitNotCalledBeforeReturn(bool, Span),

    #[error("property '{0}' not initialized at super.init call")]
    IvarNotInitializedAtSuperInit(String, Span),

    #[error("property '{0}' not initialized at implicitly generated super.init call")]
    IvarNotInitializedAtImplicitSuperInit(String, Span),

    #[error("{} called multiple times in initializer", init_call_word(.0))]
    SelfInitMultipleTimes(bool, Span),

    #[error("all stored properties of a class instance must be initialized before failing an initializer")]
    ObjectNotFullyInitializedBeforeFailure(Span),
}

impl DiDiagnostic {
    pub fn span(&self) -> Span {
        match self {
            DiDiagnostic::StoredPropertyNotInitialized(_, span) => *span,
            DiDiagnostic::VariableUsedBeforeInitialized(_, span) => *span,
            DiDiagnostic::VariableInOutBeforeInitialized(_, span) => *span,
            DiDiagnostic::VariableEscapeBeforeInitialized(_, span) => *span,
            DiDiagnostic::VariableAddrTakenBeforeInitialized(_, span) => *span,
            DiDiagnostic::GlobalVariableFunctionUseUninit(_, span) => *span,
            DiDiagnostic::StructNotFullyInitialized(_, span) => *span,
            DiDiagnostic::ImmutablePropertyAlreadyInitialized(_, span) => *span,
            DiDiagnostic::ImmutablePropertyPassedInOut(_, span) => *span,
            DiDiagnostic::SelfUseBeforeInitInDelegatingInit(span) => *span,
            DiDiagnostic::ReturnFromInitWithoutSelfInit(span) => *span,
            DiDiagnostic::ReturnFromInitWithoutInitingSelf(span) => *span,
            DiDiagnostic::ReturnFromInitWithoutInitingStoredProperties(span) => *span,
            DiDiagnostic::SelfUseBeforeFullyInit(_, _, _, span) => *span,
            DiDiagnostic::SelfBeforeSuperSelfInit(_, span) => *span,
            DiDiagnostic::UseOfSelfBeforeFullyInit(span) => *span,
            DiDiagnostic::SuperSelfInitNotCalledBeforeReturn(_, span) => *span,
            DiDiagnostic::IvarNotInitializedAtSuperInit(_, span) => *span,
            DiDiagnostic::IvarNotInitializedAtImplicitSuperInit(_, span) => *span,
            DiDiagnostic::SelfInitMultipleTimes(_, span) => *span,
            DiDiagnostic::ObjectNotFullyInitializedBeforeFailure(span) => *span,
        }
    }

    /// Notes accompany an error rather than standing alone.
    pub fn is_note(&self) -> bool {
        matches!(self, DiDiagnostic::StoredPropertyNotInitialized(..))
    }
}
