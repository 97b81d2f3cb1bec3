//! The abstract stream: an editable sequence of instructions, labels,
//! `SetLineno` markers and `TryBegin`/`TryEnd` pairs, plus the code-unit
//! header shared by every representation.

use pyforge_core::{CompilerFlags, ConstantData, InstrLocation, PythonVersion};

use crate::instr::{Element, Instr, Label, Target, TryBegin, TryBeginId, TryEnd};

/// Header of a code unit, shared by the abstract stream, the concrete
/// stream and the control-flow graph.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeMeta {
    pub version: PythonVersion,
    pub name: String,
    /// Qualified name (3.11+; mirrors `name` elsewhere).
    pub qualname: String,
    pub filename: String,
    pub flags: CompilerFlags,
    pub first_lineno: u32,
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    /// `None` when the unit has no docstring slot; `Some(ConstantData::None)`
    /// when the docstring is an explicit `None`.
    pub docstring: Option<ConstantData>,
}

impl CodeMeta {
    pub fn new(version: PythonVersion) -> Self {
        Self {
            version,
            name: "<module>".to_owned(),
            qualname: "<module>".to_owned(),
            filename: "<string>".to_owned(),
            flags: CompilerFlags::empty(),
            first_lineno: 1,
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            cellvars: Vec::new(),
            freevars: Vec::new(),
            docstring: None,
        }
    }
}

/// An abstract stream of instructions and pseudo-instructions.
///
/// The stream owns its elements and its label/try identities; jump targets
/// are references into that identity space. The element list itself is
/// public: editors splice it freely, and every consistency rule is checked
/// at conversion time.
#[derive(Clone, Debug)]
pub struct Bytecode {
    pub meta: CodeMeta,
    /// Argument names, in declaration order; they seed the varnames pool.
    pub argnames: Vec<String>,
    pub elements: Vec<Element>,
    next_label: u32,
    next_try: u32,
}

impl Bytecode {
    pub fn new(version: PythonVersion) -> Self {
        Self {
            meta: CodeMeta::new(version),
            argnames: Vec::new(),
            elements: Vec::new(),
            next_label: 0,
            next_try: 0,
        }
    }

    pub const fn version(&self) -> PythonVersion {
        self.meta.version
    }

    /// Allocate a fresh label identity. The label marks nothing until it is
    /// inserted into the stream as an element.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Allocate a fresh exception region. The returned value (and clones of
    /// it) must be inserted into the stream; `TryEnd`s reference it by id.
    pub fn new_try_begin(&mut self, target: Label, push_lasti: bool) -> TryBegin {
        let id = TryBeginId(self.next_try);
        self.next_try += 1;
        TryBegin {
            id,
            target: Target::Label(target),
            push_lasti,
            stack_depth: None,
        }
    }

    pub fn push(&mut self, element: impl Into<Element>) {
        self.elements.push(element.into());
    }

    pub fn push_label(&mut self, label: Label) {
        self.elements.push(Element::Label(label));
    }

    pub fn instrs(&self) -> impl Iterator<Item = &Instr> {
        self.elements.iter().filter_map(Element::as_instr)
    }

    pub(crate) fn has_unset_try_depth(&self) -> bool {
        self.elements.iter().any(|el| {
            matches!(el, Element::TryBegin(tb) if tb.stack_depth.is_none())
        })
    }

    /// Resolve `SetLineno` markers into instruction locations and drop them
    /// from the stream. Instructions without a location inherit the current
    /// line, starting from `first_lineno`.
    pub fn legalize(&mut self) {
        let mut current = self.meta.first_lineno;
        let mut set_lineno: Option<u32> = None;
        for element in &mut self.elements {
            match element {
                Element::SetLineno(line) => {
                    set_lineno = Some(*line);
                    current = *line;
                }
                Element::Instr(instr) => {
                    if let Some(line) = set_lineno {
                        instr.set_location(Some(InstrLocation::line(line)));
                    } else if let Some(line) = instr.lineno() {
                        current = line;
                    } else {
                        instr.set_location(Some(InstrLocation::line(current)));
                    }
                }
                _ => {}
            }
        }
        self.elements
            .retain(|el| !matches!(el, Element::SetLineno(_)));
    }

    /// Copy header attributes from another representation's header.
    pub(crate) fn copy_meta(&mut self, meta: &CodeMeta) {
        self.meta = meta.clone();
    }

    /// Reserve try-region identities at or above `floor`, for conversions
    /// that carry existing `TryBegin`s into the stream.
    pub(crate) fn bump_try_counter(&mut self, floor: u32) {
        self.next_try = self.next_try.max(floor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyforge_core::Op;

    use crate::instr::InstrArg;

    #[test]
    fn labels_are_unique_per_stream() {
        let mut code = Bytecode::new(PythonVersion::V3_8);
        let a = code.new_label();
        let b = code.new_label();
        assert_ne!(a, b);
    }

    #[test]
    fn legalize_applies_set_lineno_to_following_instrs() {
        let version = PythonVersion::V3_8;
        let mut code = Bytecode::new(version);
        code.meta.first_lineno = 3;
        code.push(Instr::new(version, Op::LoadName, InstrArg::Name("a".into())).unwrap());
        code.elements.push(Element::SetLineno(9));
        code.push(Instr::new(version, Op::PopTop, InstrArg::None).unwrap());
        code.push(Instr::new(version, Op::ReturnValue, InstrArg::None).unwrap());

        code.legalize();

        let lines: Vec<_> = code.instrs().map(|i| i.lineno()).collect();
        assert_eq!(lines, vec![Some(3), Some(9), Some(9)]);
        assert!(!code
            .elements
            .iter()
            .any(|el| matches!(el, Element::SetLineno(_))));
    }
}
