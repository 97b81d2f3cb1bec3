//! Disassemble/reassemble round trips at the code-object level.

use pyforge::{
    AssembleOptions, Bytecode, ConcreteBytecode, ConcreteInstr, ConstantData, Element, Instr,
    InstrArg, InstrLocation, Op, PythonVersion, Target, TryEnd,
};

fn reassemble(code: &pyforge::CodeObject) -> pyforge::CodeObject {
    let concrete = ConcreteBytecode::from_code(code).unwrap();
    let bytecode = concrete.to_bytecode().unwrap();
    bytecode
        .to_code_with(Some(code.stacksize), &AssembleOptions::default())
        .unwrap()
}

#[test]
fn hello_world_round_trips_on_38() {
    let version = PythonVersion::V3_8;
    let mut code = Bytecode::new(version);
    code.push(Instr::with_lineno(version, Op::LoadName, InstrArg::Name("print".into()), 1).unwrap());
    code.push(Instr::with_lineno(version, Op::LoadConst, InstrArg::Const("Hello".into()), 1).unwrap());
    code.push(Instr::with_lineno(version, Op::CallFunction, InstrArg::Raw(1), 1).unwrap());
    code.push(Instr::with_lineno(version, Op::PopTop, InstrArg::None, 1).unwrap());
    code.push(Instr::with_lineno(version, Op::LoadConst, InstrArg::Const(ConstantData::None), 2).unwrap());
    code.push(Instr::with_lineno(version, Op::ReturnValue, InstrArg::None, 2).unwrap());

    let compiled = code.to_code().unwrap();
    let again = reassemble(&compiled);

    assert_eq!(again.code, compiled.code);
    assert_eq!(again.consts, compiled.consts);
    assert_eq!(again.names, compiled.names);
    assert_eq!(again.linetable, compiled.linetable);
}

#[test]
fn exception_table_round_trips_on_311() {
    // try: a = 1
    // except: a = 2
    let version = PythonVersion::V3_11;
    let mut code = Bytecode::new(version);
    let handler = code.new_label();
    let done = code.new_label();
    let begin = code.new_try_begin(handler, false);
    let begin_id = begin.id();

    code.push(Instr::new(version, Op::Resume, InstrArg::Raw(0)).unwrap());
    code.push(Element::TryBegin(begin));
    code.push(Instr::new(version, Op::LoadConst, InstrArg::Const(1i64.into())).unwrap());
    code.push(Instr::new(version, Op::StoreName, InstrArg::Name("a".into())).unwrap());
    code.push(Element::TryEnd(TryEnd { entry: begin_id }));
    code.push(Instr::new(version, Op::JumpForward, InstrArg::Jump(Target::Label(done))).unwrap());
    code.push_label(handler);
    code.push(Instr::new(version, Op::PushExcInfo, InstrArg::None).unwrap());
    code.push(Instr::new(version, Op::PopTop, InstrArg::None).unwrap());
    code.push(Instr::new(version, Op::PopExcept, InstrArg::None).unwrap());
    code.push(Instr::new(version, Op::LoadConst, InstrArg::Const(2i64.into())).unwrap());
    code.push(Instr::new(version, Op::StoreName, InstrArg::Name("a".into())).unwrap());
    code.push_label(done);
    code.push(Instr::new(version, Op::LoadConst, InstrArg::Const(ConstantData::None)).unwrap());
    code.push(Instr::new(version, Op::ReturnValue, InstrArg::None).unwrap());

    let compiled = code.to_code().unwrap();
    assert!(!compiled.exceptiontable.is_empty());

    let again = reassemble(&compiled);
    assert_eq!(again.code, compiled.code);
    assert_eq!(again.exceptiontable, compiled.exceptiontable);
    assert_eq!(again.linetable, compiled.linetable);
    assert_eq!(again.consts, compiled.consts);

    // The reconstructed pairs carry the solved handler depth.
    let concrete = ConcreteBytecode::from_code(&compiled).unwrap();
    assert_eq!(concrete.exception_table.len(), 1);
    let entry = &concrete.exception_table[0];
    assert_eq!(entry.stack_depth, 0);
    assert!(!entry.push_lasti);
}

#[test]
fn cell_and_free_tags_survive_a_round_trip() {
    let version = PythonVersion::V3_8;
    let mut code = Bytecode::new(version);
    code.meta.cellvars = vec!["x".into()];
    code.meta.freevars = vec!["x".into()];
    code.push(Instr::new(version, Op::LoadDeref, InstrArg::Cell("x".into())).unwrap());
    code.push(Instr::new(version, Op::LoadDeref, InstrArg::Free("x".into())).unwrap());
    code.push(Instr::new(version, Op::BinaryAdd, InstrArg::None).unwrap());
    code.push(Instr::new(version, Op::ReturnValue, InstrArg::None).unwrap());

    let compiled = code.to_code().unwrap();
    // The same spelling resolves to index 0 as a cell and index 1 as a free.
    assert_eq!(compiled.code[0..4], [136, 0, 136, 1]);

    let back = ConcreteBytecode::from_code(&compiled)
        .unwrap()
        .to_bytecode()
        .unwrap();
    let args: Vec<InstrArg> = back.instrs().map(|i| i.arg().clone()).collect();
    assert_eq!(args[0], InstrArg::Cell("x".into()));
    assert_eq!(args[1], InstrArg::Free("x".into()));

    let again = back
        .to_code_with(Some(compiled.stacksize), &AssembleOptions::default())
        .unwrap();
    assert_eq!(again.code, compiled.code);
}

#[test]
fn zero_extended_arg_before_nop_is_preserved_concretely() {
    let version = PythonVersion::V3_8;
    let mut concrete = ConcreteBytecode::new(version);
    concrete
        .instrs
        .push(ConcreteInstr::with_extended_args(Op::Nop, 0, 1).unwrap());
    concrete
        .instrs
        .push(ConcreteInstr::new(Op::ReturnValue, 0).unwrap());

    let compiled = concrete
        .to_code_with(Some(1), &AssembleOptions::default())
        .unwrap();
    assert_eq!(compiled.code, vec![144, 0, 9, 0, 83, 0]);

    // Concrete round trip: the meaningless prefix survives byte for byte.
    let again = ConcreteBytecode::from_code(&compiled)
        .unwrap()
        .to_code_with(Some(1), &AssembleOptions::default())
        .unwrap();
    assert_eq!(again.code, compiled.code);

    // Abstract round trip: the prefix is dropped.
    let stripped = ConcreteBytecode::from_code(&compiled)
        .unwrap()
        .to_bytecode()
        .unwrap()
        .to_code_with(Some(1), &AssembleOptions::default())
        .unwrap();
    assert_eq!(stripped.code, vec![9, 0, 83, 0]);
}

#[test]
fn negative_line_deltas_round_trip_on_310() {
    let version = PythonVersion::V3_10;
    let mut code = Bytecode::new(version);
    code.meta.first_lineno = 5;
    code.push(Instr::with_lineno(version, Op::LoadName, InstrArg::Name("a".into()), 5).unwrap());
    code.push(Instr::with_lineno(version, Op::PopTop, InstrArg::None, 9).unwrap());
    // The line goes backwards, which only the 3.10+ tables can encode.
    code.push(Instr::with_lineno(version, Op::LoadName, InstrArg::Name("b".into()), 2).unwrap());
    code.push(Instr::with_lineno(version, Op::ReturnValue, InstrArg::None, 2).unwrap());

    let compiled = code.to_code().unwrap();
    let decoded = ConcreteBytecode::from_code(&compiled).unwrap();
    let lines: Vec<Option<u32>> = decoded
        .instrs
        .iter()
        .map(|i| i.location.and_then(|loc| loc.lineno))
        .collect();
    assert_eq!(lines, vec![Some(5), Some(9), Some(2), Some(2)]);

    let again = reassemble(&compiled);
    assert_eq!(again.linetable, compiled.linetable);
    assert_eq!(again.code, compiled.code);
}

#[test]
fn column_spans_round_trip_on_312() {
    let version = PythonVersion::V3_12;
    let mut code = Bytecode::new(version);
    code.push(
        Instr::with_location(
            version,
            Op::LoadName,
            InstrArg::Name("value".into()),
            InstrLocation::span(1, 1, 4, 9),
        )
        .unwrap(),
    );
    code.push(
        Instr::with_location(
            version,
            Op::ReturnValue,
            InstrArg::None,
            InstrLocation::span(1, 1, 0, 9),
        )
        .unwrap(),
    );

    let compiled = code.to_code().unwrap();
    let decoded = ConcreteBytecode::from_code(&compiled).unwrap();
    assert_eq!(
        decoded.instrs[0].location,
        Some(InstrLocation::span(1, 1, 4, 9))
    );
    assert_eq!(
        decoded.instrs[1].location,
        Some(InstrLocation::span(1, 1, 0, 9))
    );

    let again = reassemble(&compiled);
    assert_eq!(again.linetable, compiled.linetable);
}

#[test]
fn label_identities_are_unique_after_disassembly() {
    let version = PythonVersion::V3_8;
    let mut code = Bytecode::new(version);
    let shared = code.new_label();
    code.push(
        Instr::new(version, Op::JumpAbsolute, InstrArg::Jump(Target::Label(shared))).unwrap(),
    );
    code.push_label(shared);
    code.push(Instr::new(version, Op::JumpAbsolute, InstrArg::Jump(Target::Label(shared))).unwrap());

    let compiled = code.to_code_with(Some(0), &AssembleOptions::default()).unwrap();
    let back = ConcreteBytecode::from_code(&compiled)
        .unwrap()
        .to_bytecode()
        .unwrap();

    // Both jumps reach one label, present exactly once in the stream.
    let mut label_elements = 0;
    for element in &back.elements {
        if matches!(element, Element::Label(_)) {
            label_elements += 1;
        }
    }
    assert_eq!(label_elements, 1);
}
