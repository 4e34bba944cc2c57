#![doc = include_str!("../../../README.md")]

pub mod air;
pub mod build;
mod context;
mod eval;
mod exception;
mod function;
mod gc;
pub mod io;
pub mod library;
mod llds;
mod opaque;
mod ops;
mod reference;
mod resource;
mod run;
mod source;
mod statement;
pub mod tracer;
mod value;
mod variable;

pub use crate::{
    context::{GlobalContext, InterruptFlag, Scope},
    exception::{ExecResult, Exception, ExceptionKind, Frame, FrameKind},
    function::{Function, FunctionDef, NativeFunction, ScriptedFunction},
    gc::{DEFAULT_THRESHOLDS, GENERATION_COUNT, GarbageCollector, Generation},
    llds::{PointerHashSet, ReferenceDictionary, VariableHashMap},
    opaque::{Opaque, OpaqueData},
    reference::{Modifier, PtcCall, Reference, Root},
    resource::{DEFAULT_MAX_ARGUMENT_COUNT, DEFAULT_MAX_RECURSION_DEPTH, Options},
    run::{ModuleLoader, Script},
    source::SourceLocation,
    statement::{Program, Statement, SwitchClause},
    value::{Compare, ObjectMap, Type, Value},
    variable::{VarHandle, Variable},
};
