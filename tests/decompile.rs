mod common;

use classfile_decompiler::code_attribute::decode_method;
use classfile_decompiler::decompile::cfg::build_cfg;
use classfile_decompiler::decompile::expr::{BinaryOp, Expr, ExprKind, Literal, StmtKind};
use classfile_decompiler::decompile::goto_reducer::reduce_gotos;
use classfile_decompiler::decompile::local_variables::LocalFlags;
use classfile_decompiler::decompile::loop_reducer::reduce_loops;
use classfile_decompiler::decompile::structured_types::StructuredStmt;
use classfile_decompiler::decompile::visitor::{walk_expr, walk_statement};
use classfile_decompiler::decompile::{MethodDeclaration, Modifiers, TypeKind};
use classfile_decompiler::error::WarningKind;
use classfile_decompiler::{
    decompile, read_class, CompilationUnit, DecompileOptions, Decompiler, Node, NodeKind, Visitor,
};

use common::{ClassBuilder, Code, ACC_ABSTRACT, ACC_PUBLIC, ACC_STATIC, ACC_SYNTHETIC};

/// Everything reachable from a method body.
#[derive(Default)]
struct Collector {
    statements: Vec<StructuredStmt>,
    exprs: Vec<Expr>,
}

impl Visitor for Collector {
    fn visit_statement(&mut self, stmt: &StructuredStmt) {
        self.statements.push(stmt.clone());
        walk_statement(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        self.exprs.push(expr.clone());
        walk_expr(self, expr);
    }
}

fn collect(method: &MethodDeclaration) -> Collector {
    let mut collector = Collector::default();
    method.accept(&mut collector);
    collector
}

fn method<'a>(unit: &'a CompilationUnit, name: &str) -> &'a MethodDeclaration {
    unit.type_declaration
        .find_method(name)
        .unwrap_or_else(|| panic!("{} should be decompiled", name))
}

/// `static int sum(int n) { int total = 0; for (int i = 0; i < n; i++) total += i; return total; }`
fn sum_code(with_debug_info: bool) -> Code {
    let code = Code::new(
        2,
        3,
        vec![
            0x03, // iconst_0
            0x3c, // istore_1
            0x03, // iconst_0
            0x3d, // istore_2
            0x1c, // iload_2
            0x1a, // iload_0
            0xa2, 0x00, 0x0d, // if_icmpge 19
            0x1b, // iload_1
            0x1c, // iload_2
            0x60, // iadd
            0x3c, // istore_1
            0x84, 0x02, 0x01, // iinc 2, 1
            0xa7, 0xff, 0xf4, // goto 4
            0x1b, // iload_1
            0xac, // ireturn
        ],
    );
    if !with_debug_info {
        return code;
    }
    code.line(0, 3)
        .line(2, 4)
        .line(9, 5)
        .line(13, 4)
        .line(19, 7)
        .local(0, 21, "n", "I", 0)
        .local(2, 19, "total", "I", 1)
        .local(4, 15, "i", "I", 2)
}

/// `static void down(int x) { while (x > 0) x--; }`
fn while_code() -> Code {
    Code::new(
        1,
        1,
        vec![
            0x1a, // iload_0
            0x9e, 0x00, 0x09, // ifle 10
            0x84, 0x00, 0xff, // iinc 0, -1
            0xa7, 0xff, 0xf9, // goto 0
            0xb1, // return
        ],
    )
}

/// `static void spin(int x) { do { x--; } while (x > 0); }`
fn do_while_code() -> Code {
    Code::new(
        1,
        1,
        vec![
            0x84, 0x00, 0xff, // iinc 0, -1
            0x1a, // iload_0
            0x9d, 0xff, 0xfc, // ifgt 0
            0xb1, // return
        ],
    )
}

/// `static int both(int a, int b) { if (a > 0 && b > 0) return 1; return 0; }`
fn short_circuit_code() -> Code {
    Code::new(
        1,
        2,
        vec![
            0x1a, // iload_0
            0x9e, 0x00, 0x09, // ifle 10
            0x1b, // iload_1
            0x9e, 0x00, 0x05, // ifle 10
            0x04, // iconst_1
            0xac, // ireturn
            0x03, // iconst_0
            0xac, // ireturn
        ],
    )
}

/// `static void guarded(int a) { try { a++; } finally { a--; } }`
fn try_finally_code() -> Code {
    Code::new(
        1,
        2,
        vec![
            0x84, 0x00, 0x01, // iinc 0, 1
            0x84, 0x00, 0xff, // iinc 0, -1
            0xa7, 0x00, 0x0b, // goto 17
            0x4c, // astore_1
            0x84, 0x00, 0xff, // iinc 0, -1
            0x2b, // aload_1
            0xbf, // athrow
            0x00, // nop
            0x00, // nop
            0xb1, // return
        ],
    )
    .catch(0, 3, 9, 0)
}

fn loops_class() -> Vec<u8> {
    let mut builder = ClassBuilder::new("com/example/Loops");
    builder.default_constructor();
    builder.method(ACC_PUBLIC | ACC_STATIC, "sum", "(I)I", Some(sum_code(true)));
    builder.method(ACC_STATIC, "down", "(I)V", Some(while_code()));
    builder.method(ACC_STATIC, "spin", "(I)V", Some(do_while_code()));
    builder.method(ACC_STATIC, "both", "(II)I", Some(short_circuit_code()));
    builder.method(ACC_STATIC, "guarded", "(I)V", Some(try_finally_code()));
    builder.build()
}

#[test]
fn test_class_header() {
    let unit = decompile(&loops_class()).unwrap();
    assert_eq!(unit.package.as_deref(), Some("com.example"));
    let decl = &unit.type_declaration;
    assert_eq!(decl.kind, TypeKind::Class);
    assert_eq!(decl.name, "com/example/Loops");
    assert_eq!(decl.simple_name(), "Loops");
    assert_eq!(decl.super_class.as_deref(), Some("java/lang/Object"));
    assert_eq!(decl.source_file.as_deref(), Some("Test.java"));
    assert!(decl.modifiers.contains(Modifiers::PUBLIC));
    assert_eq!(unit.kind(), NodeKind::CompilationUnit);
}

#[test]
fn test_constructor_body_is_empty() {
    let unit = decompile(&loops_class()).unwrap();
    let init = method(&unit, "<init>");
    assert!(init.is_constructor());
    assert!(!init.is_static_initializer());
    assert!(init.body.as_ref().unwrap().statements.is_empty());
}

#[test]
fn test_for_loop() {
    let unit = decompile(&loops_class()).unwrap();
    assert!(unit.warnings.is_empty(), "{:?}", unit.warnings);
    let sum = method(&unit, "sum");
    assert_eq!(sum.parameters[0].name, "n");

    let body = sum.body.as_ref().unwrap();
    let for_loop = body
        .statements
        .iter()
        .find(|s| matches!(s, StructuredStmt::For { .. }))
        .expect("sum should contain a for loop");
    match for_loop {
        StructuredStmt::For {
            init,
            condition,
            update,
            body,
        } => {
            assert_eq!(init.len(), 1);
            assert_eq!(update.len(), 1);
            assert_eq!(body.len(), 1);
            match &condition.kind {
                ExprKind::Compare { left, .. } => {
                    assert_eq!(left.as_local().map(|l| l.name.as_str()), Some("i"));
                }
                other => panic!("unexpected condition {:?}", other),
            }
        }
        _ => unreachable!(),
    }
    assert!(matches!(
        body.statements.last(),
        Some(StructuredStmt::Simple(s)) if matches!(s.kind, StmtKind::Return(Some(_)))
    ));
    assert!(body.locals.iter().any(|v| v.name == "total"));
    assert!(body.locals.iter().any(|v| v.name == "n" && v.is_parameter()));
}

#[test]
fn test_while_and_do_while() {
    let unit = decompile(&loops_class()).unwrap();
    let down = method(&unit, "down").body.as_ref().unwrap();
    assert!(matches!(down.statements.as_slice(), [StructuredStmt::While { .. }]));
    let spin = method(&unit, "spin").body.as_ref().unwrap();
    assert!(matches!(spin.statements.as_slice(), [StructuredStmt::DoWhile { .. }]));
}

#[test]
fn test_short_circuit_condition() {
    let unit = decompile(&loops_class()).unwrap();
    let both = collect(method(&unit, "both"));
    // Both tests end up in one condition, not in nested ifs.
    assert!(both.exprs.iter().any(|e| matches!(
        e.kind,
        ExprKind::Binary {
            op: BinaryOp::And | BinaryOp::Or,
            ..
        }
    )));
    let ifs = both
        .statements
        .iter()
        .filter(|s| matches!(s, StructuredStmt::If { .. }))
        .count();
    assert!(ifs <= 1);
    assert!(!both.statements.iter().any(|s| matches!(
        s,
        StructuredStmt::Goto(_) | StructuredStmt::Label(_)
    )));
}

#[test]
fn test_try_finally_is_one_statement() {
    let unit = decompile(&loops_class()).unwrap();
    let guarded = method(&unit, "guarded").body.as_ref().unwrap();
    let tries: Vec<&StructuredStmt> = guarded
        .statements
        .iter()
        .filter(|s| matches!(s, StructuredStmt::TryCatch { .. }))
        .collect();
    assert_eq!(tries.len(), 1);
    match tries[0] {
        StructuredStmt::TryCatch {
            try_body,
            catches,
            finally_body: Some(finally_body),
        } => {
            assert_eq!(try_body.len(), 1);
            assert!(catches.is_empty());
            assert_eq!(finally_body.len(), 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_synthesized_names_without_debug_info() {
    let mut builder = ClassBuilder::new("Plain");
    builder.method(ACC_STATIC, "sum", "(I)I", Some(sum_code(false)));
    let unit = decompile(&builder.build()).unwrap();
    let sum = method(&unit, "sum");
    assert_eq!(sum.parameters[0].name, "param1");
    let names: Vec<&str> = sum.body.as_ref().unwrap().locals.iter().map(|v| v.name.as_str()).collect();
    assert!(names.contains(&"i1"), "{:?}", names);
    assert!(names.contains(&"i2"), "{:?}", names);
}

#[test]
fn test_local_ranges_are_disjoint() {
    let unit = decompile(&loops_class()).unwrap();
    for decl in &unit.type_declaration.methods {
        let Some(body) = &decl.body else { continue };
        let live: Vec<_> = body
            .locals
            .iter()
            .filter(|v| !v.flags.contains(LocalFlags::TO_BE_REMOVED))
            .collect();
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                assert!(!a.overlaps(b), "{}: {:?} overlaps {:?}", decl.name, a, b);
            }
        }
    }
}

#[test]
fn test_line_layout() {
    let unit = decompile(&loops_class()).unwrap();
    let sum = method(&unit, "sum");
    let body = sum.body.as_ref().unwrap();
    assert_eq!(body.layout.len(), collect(sum).statements.len());
    assert_eq!(body.layout.first_line(), Some(3));
    assert_eq!(body.layout.last_line(), Some(7));
    assert_eq!(body.layout.lines().first(), Some(&Some(3)));

    // Without a LineNumberTable no statement has a line.
    let down = method(&unit, "down").body.as_ref().unwrap();
    assert!(down.layout.lines().iter().all(|l| l.is_none()));
}

#[test]
fn test_char_literal_inference() {
    let mut builder = ClassBuilder::new("Chars");
    let index_of = builder.method_ref("java/lang/String", "indexOf", "(I)I");
    let [hi, lo] = index_of.to_be_bytes();
    // return s.indexOf(98);
    builder.method(
        ACC_STATIC,
        "literal",
        "(Ljava/lang/String;)I",
        Some(Code::new(2, 1, vec![0x2a, 0x10, 0x62, 0xb6, hi, lo, 0xac])),
    );
    // return s.indexOf(c);
    builder.method(
        ACC_STATIC,
        "variable",
        "(Ljava/lang/String;I)I",
        Some(Code::new(2, 2, vec![0x2a, 0x1b, 0xb6, hi, lo, 0xac])),
    );
    let bytes = builder.build();

    let first_arg = |unit: &CompilationUnit, method_name: &str| -> ExprKind {
        collect(method(unit, method_name))
            .exprs
            .into_iter()
            .find_map(|e| match e.kind {
                ExprKind::Invoke { name, args, .. } if name == "indexOf" => Some(args[0].kind.clone()),
                _ => None,
            })
            .expect("indexOf call")
    };

    let unit = decompile(&bytes).unwrap();
    assert_eq!(first_arg(&unit, "literal"), ExprKind::Literal(Literal::Char(98)));
    assert!(matches!(first_arg(&unit, "variable"), ExprKind::Local(_)));

    let plain = Decompiler::new(DecompileOptions {
        infer_char_literals: false,
        ..Default::default()
    })
    .decompile(&bytes)
    .unwrap();
    assert!(matches!(
        first_arg(&plain, "literal"),
        ExprKind::Literal(Literal::Int { value: 98, .. })
    ));
}

#[test]
fn test_string_builder_chain() {
    let mut builder = ClassBuilder::new("Greeter");
    let sb_class = builder.pool().add_class("java/lang/StringBuilder").unwrap();
    let init = builder.method_ref("java/lang/StringBuilder", "<init>", "()V");
    let append = builder.method_ref(
        "java/lang/StringBuilder",
        "append",
        "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
    );
    let to_string = builder.method_ref("java/lang/StringBuilder", "toString", "()Ljava/lang/String;");
    let hello = builder.string("hi ");
    let [c0, c1] = sb_class.to_be_bytes();
    let [i0, i1] = init.to_be_bytes();
    let [a0, a1] = append.to_be_bytes();
    let [t0, t1] = to_string.to_be_bytes();
    // return new StringBuilder().append("hi ").append(name).toString();
    builder.method(
        ACC_STATIC,
        "greet",
        "(Ljava/lang/String;)Ljava/lang/String;",
        Some(Code::new(
            2,
            1,
            vec![
                0xbb, c0, c1, // new
                0x59, // dup
                0xb7, i0, i1, // invokespecial <init>
                0x12, hello as u8, // ldc "hi "
                0xb6, a0, a1, // invokevirtual append
                0x2a, // aload_0
                0xb6, a0, a1, // invokevirtual append
                0xb6, t0, t1, // invokevirtual toString
                0xb0, // areturn
            ],
        )),
    );
    let unit = decompile(&builder.build()).unwrap();
    let body = method(&unit, "greet").body.as_ref().unwrap();
    match body.statements.as_slice() {
        [StructuredStmt::Simple(s)] => match &s.kind {
            StmtKind::Return(Some(value)) => match &value.kind {
                ExprKind::StringConcat(parts) => {
                    assert_eq!(parts.len(), 2);
                    assert_eq!(parts[0].kind, ExprKind::Literal(Literal::String("hi ".into())));
                    assert!(matches!(parts[1].kind, ExprKind::Local(_)));
                }
                other => panic!("expected a concatenation, got {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        },
        other => panic!("unexpected body {:?}", other),
    }
}

#[test]
fn test_unsupported_method_degrades_locally() {
    let mut builder = ClassBuilder::new("Partial");
    builder.method(ACC_STATIC, "broken", "()V", Some(Code::new(0, 0, vec![0xcb, 0xb1])));
    builder.method(ACC_STATIC, "down", "(I)V", Some(while_code()));
    let unit = decompile(&builder.build()).unwrap();

    let broken = method(&unit, "broken").body.as_ref().unwrap();
    match broken.statements.as_slice() {
        [StructuredStmt::Comment(text)] => assert!(text.starts_with("unsupported bytecode"), "{}", text),
        other => panic!("expected a placeholder, got {:?}", other),
    }
    assert_eq!(unit.warnings.len(), 1);
    assert_eq!(unit.warnings[0].kind, WarningKind::UnsupportedBytecode);
    assert_eq!(unit.warnings[0].method, "broken()V");

    let down = method(&unit, "down").body.as_ref().unwrap();
    assert!(matches!(down.statements.as_slice(), [StructuredStmt::While { .. }]));
}

#[test]
fn test_synthetic_and_abstract_members() {
    let mut builder = ClassBuilder::new("Members");
    builder.method(ACC_PUBLIC | ACC_ABSTRACT, "run", "()V", None);
    builder.method(ACC_STATIC | ACC_SYNTHETIC, "access$000", "()V", Some(Code::new(0, 0, vec![0xb1])));
    builder.field(ACC_SYNTHETIC, "this$0", "LMembers;");
    let bytes = builder.build();

    let unit = decompile(&bytes).unwrap();
    let decl = &unit.type_declaration;
    assert!(decl.fields.is_empty());
    assert_eq!(decl.methods.len(), 1);
    let run = &decl.methods[0];
    assert!(run.body.is_none());
    assert!(run.modifiers.contains(Modifiers::ABSTRACT));

    let all = Decompiler::new(DecompileOptions {
        include_synthetic: true,
        ..Default::default()
    })
    .decompile(&bytes)
    .unwrap();
    assert_eq!(all.type_declaration.methods.len(), 2);
    assert_eq!(all.type_declaration.fields.len(), 1);
    assert!(all.type_declaration.methods[1].modifiers.contains(Modifiers::SYNTHETIC));
}

#[test]
fn test_decompile_into_sink() {
    let decompiler = Decompiler::default();
    let mut sink: Vec<CompilationUnit> = Vec::new();
    decompiler.decompile_into(&loops_class(), &mut sink).unwrap();
    assert!(decompiler.decompile_into(b"nope", &mut sink).is_err());
    assert_eq!(sink.len(), 1);
    assert_eq!(sink[0].type_declaration.name, "com/example/Loops");
}

#[test]
fn test_output_is_deterministic() {
    let bytes = loops_class();
    let first = decompile(&bytes).unwrap();
    let second = decompile(&bytes).unwrap();
    assert_eq!(first, second);

    let class = read_class(&bytes).unwrap();
    let decompiler = Decompiler::default();
    assert_eq!(decompiler.decompile_class(&class), first);
}

#[test]
fn test_reducers_are_idempotent() {
    let class = read_class(&loops_class()).unwrap();
    for name in ["sum", "down", "spin", "both", "guarded"] {
        let code = class.find_method(name).and_then(|m| m.code()).unwrap();
        let decoded = decode_method(code, &class.const_pool).unwrap();
        if name == "guarded" {
            assert!(decoded.catch_blocks[0].is_finally());
        }
        let mut cfg = build_cfg(&decoded);
        reduce_gotos(&mut cfg, true);
        let once = cfg.clone();
        reduce_gotos(&mut cfg, true);
        assert_eq!(cfg, once, "goto reduction of {} changed on a second run", name);

        reduce_loops(&mut cfg, &class.const_pool);
        let loops = cfg.loops.clone();
        reduce_loops(&mut cfg, &class.const_pool);
        assert_eq!(cfg.loops, loops, "loop reduction of {} changed on a second run", name);
    }
}

/// Non-label statements of a list.
fn code_of(stmts: &[StructuredStmt]) -> Vec<&StructuredStmt> {
    stmts.iter().filter(|s| !matches!(s, StructuredStmt::Label(_))).collect()
}

fn calls(stmts: &[StructuredStmt], name: &str) -> bool {
    let mut collector = Collector::default();
    for stmt in stmts {
        collector.visit_statement(stmt);
    }
    collector
        .exprs
        .iter()
        .any(|e| matches!(&e.kind, ExprKind::Invoke { name: called, .. } if called == name))
}

#[test]
fn test_array_for_each() {
    let mut builder = ClassBuilder::new("Arrays");
    // static int total(int[] a) { int s = 0; for (int x : a) s += x; return s; }
    builder.method(
        ACC_STATIC,
        "total",
        "([I)I",
        Some(Code::new(
            2,
            6,
            vec![
                0x03, // iconst_0
                0x3c, // istore_1
                0x2a, // aload_0
                0x4d, // astore_2
                0x2c, // aload_2
                0xbe, // arraylength
                0x3e, // istore_3
                0x03, // iconst_0
                0x36, 0x04, // istore 4
                0x15, 0x04, // iload 4
                0x1d, // iload_3
                0xa2, 0x00, 0x14, // if_icmpge 33
                0x2c, // aload_2
                0x15, 0x04, // iload 4
                0x2e, // iaload
                0x36, 0x05, // istore 5
                0x1b, // iload_1
                0x15, 0x05, // iload 5
                0x60, // iadd
                0x3c, // istore_1
                0x84, 0x04, 0x01, // iinc 4, 1
                0xa7, 0xff, 0xec, // goto 10
                0x1b, // iload_1
                0xac, // ireturn
            ],
        )),
    );
    let unit = decompile(&builder.build()).unwrap();
    let total = collect(method(&unit, "total"));
    let for_each = total
        .statements
        .iter()
        .find(|s| matches!(s, StructuredStmt::ForEach { .. }))
        .expect("total should iterate with for-each");
    match for_each {
        StructuredStmt::ForEach { var, iterable, body } => {
            assert_eq!(var.slot, 5);
            assert!(iterable.is_local_slot(0), "{:?}", iterable);
            assert_eq!(code_of(body).len(), 1);
        }
        _ => unreachable!(),
    }
    assert!(!total.statements.iter().any(|s| matches!(
        s,
        StructuredStmt::For { .. } | StructuredStmt::While { .. } | StructuredStmt::Goto(_)
    )));
}

#[test]
fn test_iterator_for_each() {
    let mut builder = ClassBuilder::new("Lists");
    let iterator = builder.interface_method_ref("java/util/List", "iterator", "()Ljava/util/Iterator;");
    let has_next = builder.interface_method_ref("java/util/Iterator", "hasNext", "()Z");
    let next = builder.interface_method_ref("java/util/Iterator", "next", "()Ljava/lang/Object;");
    let hash_code = builder.method_ref("java/lang/Object", "hashCode", "()I");
    let [it0, it1] = iterator.to_be_bytes();
    let [h0, h1] = has_next.to_be_bytes();
    let [n0, n1] = next.to_be_bytes();
    let [c0, c1] = hash_code.to_be_bytes();
    // static void each(List l) { for (Object o : l) o.hashCode(); }
    builder.method(
        ACC_STATIC,
        "each",
        "(Ljava/util/List;)V",
        Some(Code::new(
            1,
            3,
            vec![
                0x2a, // aload_0
                0xb9, it0, it1, 0x01, 0x00, // invokeinterface iterator
                0x4c, // astore_1
                0x2b, // aload_1
                0xb9, h0, h1, 0x01, 0x00, // invokeinterface hasNext
                0x99, 0x00, 0x12, // ifeq 31
                0x2b, // aload_1
                0xb9, n0, n1, 0x01, 0x00, // invokeinterface next
                0x4d, // astore_2
                0x2c, // aload_2
                0xb6, c0, c1, // invokevirtual hashCode
                0x57, // pop
                0xa7, 0xff, 0xeb, // goto 7
                0xb1, // return
            ],
        )),
    );
    let unit = decompile(&builder.build()).unwrap();
    let each = method(&unit, "each").body.as_ref().unwrap();
    let loops: Vec<&StructuredStmt> = each
        .statements
        .iter()
        .filter(|s| matches!(s, StructuredStmt::ForEach { .. } | StructuredStmt::While { .. }))
        .collect();
    match loops.as_slice() {
        [StructuredStmt::ForEach { var, iterable, body }] => {
            assert_eq!(var.slot, 2);
            assert!(iterable.is_local_slot(0), "{:?}", iterable);
            assert!(calls(body, "hashCode"));
            assert!(!calls(body, "next"));
        }
        other => panic!("expected a single for-each, got {:?}", other),
    }
    assert!(!calls(&each.statements, "hasNext"));
}

#[test]
fn test_switch_with_fallthrough_and_break() {
    let mut builder = ClassBuilder::new("Switches");
    // static int pick(int k) {
    //     int r = 0;
    //     switch (k) { case 1: r = 10; case 2: r++; break; default: r = 5; }
    //     return r;
    // }
    builder.method(
        ACC_STATIC,
        "pick",
        "(I)I",
        Some(Code::new(
            1,
            2,
            vec![
                0x03, // iconst_0
                0x3c, // istore_1
                0x1a, // iload_0
                0xaa, // tableswitch, already aligned
                0x00, 0x00, 0x00, 0x1e, // default: 33
                0x00, 0x00, 0x00, 0x01, // low
                0x00, 0x00, 0x00, 0x02, // high
                0x00, 0x00, 0x00, 0x15, // 1: 24
                0x00, 0x00, 0x00, 0x18, // 2: 27
                0x10, 0x0a, // bipush 10
                0x3c, // istore_1
                0x84, 0x01, 0x01, // iinc 1, 1
                0xa7, 0x00, 0x05, // goto 35
                0x08, // iconst_5
                0x3c, // istore_1
                0x1b, // iload_1
                0xac, // ireturn
            ],
        )),
    );
    let unit = decompile(&builder.build()).unwrap();
    let pick = collect(method(&unit, "pick"));
    let cases = pick
        .statements
        .iter()
        .find_map(|s| match s {
            StructuredStmt::Switch { key, cases } => {
                assert!(key.is_local_slot(0), "{:?}", key);
                Some(cases.clone())
            }
            _ => None,
        })
        .expect("pick should contain a switch");
    let labels: Vec<Vec<Option<i32>>> = cases.iter().map(|c| c.labels.clone()).collect();
    assert_eq!(labels, vec![vec![Some(1)], vec![Some(2)], vec![None]]);
    assert!(cases[0].falls_through);
    assert!(!cases[1].falls_through);
    assert!(matches!(code_of(&cases[1].body).last(), Some(StructuredStmt::Break(None))));
    assert_eq!(code_of(&cases[2].body).len(), 1);
    assert!(!pick.statements.iter().any(|s| matches!(s, StructuredStmt::Goto(_))));
}

#[test]
fn test_synchronized_block() {
    let mut builder = ClassBuilder::new("Locks");
    let notify = builder.method_ref("java/lang/Object", "notify", "()V");
    let [n0, n1] = notify.to_be_bytes();
    // static void wake(Object o) { synchronized (o) { o.notify(); } }
    builder.method(
        ACC_STATIC,
        "wake",
        "(Ljava/lang/Object;)V",
        Some(
            Code::new(
                2,
                3,
                vec![
                    0x2a, // aload_0
                    0x59, // dup
                    0x4c, // astore_1
                    0xc2, // monitorenter
                    0x2a, // aload_0
                    0xb6, n0, n1, // invokevirtual notify
                    0x2b, // aload_1
                    0xc3, // monitorexit
                    0xa7, 0x00, 0x08, // goto 18
                    0x4d, // astore_2
                    0x2b, // aload_1
                    0xc3, // monitorexit
                    0x2c, // aload_2
                    0xbf, // athrow
                    0xb1, // return
                ],
            )
            .catch(4, 10, 13, 0)
            .catch(13, 16, 13, 0),
        ),
    );
    let unit = decompile(&builder.build()).unwrap();
    let wake = collect(method(&unit, "wake"));
    let (object, body) = wake
        .statements
        .iter()
        .find_map(|s| match s {
            StructuredStmt::Synchronized { object, body } => Some((object.clone(), body.clone())),
            _ => None,
        })
        .expect("wake should contain a synchronized block");
    assert!(object.is_local_slot(0), "{:?}", object);
    assert!(calls(&body, "notify"));
    assert!(!wake.statements.iter().any(|s| match s {
        StructuredStmt::TryCatch { .. } => true,
        StructuredStmt::Simple(stmt) => {
            matches!(stmt.kind, StmtKind::MonitorEnter(_) | StmtKind::MonitorExit(_))
        }
        _ => false,
    }));
}

#[test]
fn test_irreducible_flow_keeps_goto() {
    let mut builder = ClassBuilder::new("Tangled");
    // Two entries into one cycle: neither block dominates the other.
    builder.method(
        ACC_STATIC,
        "tangle",
        "(I)V",
        Some(Code::new(
            1,
            1,
            vec![
                0x1a, // iload_0
                0x99, 0x00, 0x06, // ifeq 7
                0x84, 0x00, 0x01, // iinc 0, 1
                0x84, 0x00, 0xff, // iinc 0, -1
                0x1a, // iload_0
                0x9d, 0xff, 0xf9, // ifgt 4
                0xb1, // return
            ],
        )),
    );
    let unit = decompile(&builder.build()).unwrap();
    let tangle = collect(method(&unit, "tangle"));
    let gotos: Vec<&String> = tangle
        .statements
        .iter()
        .filter_map(|s| match s {
            StructuredStmt::Goto(label) => Some(label),
            _ => None,
        })
        .collect();
    assert!(!gotos.is_empty());
    for label in gotos {
        assert!(
            tangle
                .statements
                .iter()
                .any(|s| matches!(s, StructuredStmt::Label(l) if l == label)),
            "no label {}",
            label
        );
    }
    assert!(unit
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::ReductionAmbiguity && w.method == "tangle(I)V"));
}

#[test]
fn test_return_inside_try_finally() {
    let mut builder = ClassBuilder::new("Finals");
    // static int bump(int a) { try { return a; } finally { a++; } }
    builder.method(
        ACC_STATIC,
        "bump",
        "(I)I",
        Some(
            Code::new(
                1,
                3,
                vec![
                    0x1a, // iload_0
                    0x3c, // istore_1
                    0x84, 0x00, 0x01, // iinc 0, 1
                    0x1b, // iload_1
                    0xac, // ireturn
                    0x4d, // astore_2
                    0x84, 0x00, 0x01, // iinc 0, 1
                    0x2c, // aload_2
                    0xbf, // athrow
                ],
            )
            .catch(0, 2, 7, 0),
        ),
    );
    let unit = decompile(&builder.build()).unwrap();
    let bump = method(&unit, "bump").body.as_ref().unwrap();
    let tries: Vec<&StructuredStmt> = bump
        .statements
        .iter()
        .filter(|s| matches!(s, StructuredStmt::TryCatch { .. }))
        .collect();
    match tries.as_slice() {
        [StructuredStmt::TryCatch {
            try_body,
            catches,
            finally_body: Some(finally_body),
        }] => {
            assert!(catches.is_empty());
            assert!(matches!(
                code_of(try_body).last(),
                Some(StructuredStmt::Simple(s)) if matches!(s.kind, StmtKind::Return(Some(_)))
            ));
            // The inlined copy before the return is gone.
            let increments = |stmts: &[StructuredStmt]| {
                let mut collector = Collector::default();
                for stmt in stmts {
                    collector.visit_statement(stmt);
                }
                collector
                    .exprs
                    .iter()
                    .filter(|e| matches!(e.kind, ExprKind::Increment { .. }))
                    .count()
            };
            assert_eq!(increments(try_body), 0);
            assert_eq!(code_of(finally_body).len(), 1);
            assert_eq!(increments(finally_body), 1);
        }
        other => panic!("expected one try statement, got {:?}", other),
    }
}

#[test]
fn test_typed_catch_with_finally() {
    let mut builder = ClassBuilder::new("Guard");
    let exception = builder.pool().add_class("java/lang/RuntimeException").unwrap();
    let foo = builder.method_ref("Guard", "foo", "()V");
    let bar = builder.method_ref("Guard", "bar", "()V");
    let baz = builder.method_ref("Guard", "baz", "()V");
    let [f0, f1] = foo.to_be_bytes();
    let [b0, b1] = bar.to_be_bytes();
    let [z0, z1] = baz.to_be_bytes();
    // static void guard() { try { foo(); } catch (RuntimeException ex) { bar(); } finally { baz(); } }
    builder.method(
        ACC_STATIC,
        "guard",
        "()V",
        Some(
            Code::new(
                1,
                2,
                vec![
                    0xb8, f0, f1, // invokestatic foo
                    0xb8, z0, z1, // invokestatic baz
                    0xa7, 0x00, 0x13, // goto 25
                    0x4b, // astore_0
                    0xb8, b0, b1, // invokestatic bar
                    0xb8, z0, z1, // invokestatic baz
                    0xa7, 0x00, 0x09, // goto 25
                    0x4c, // astore_1
                    0xb8, z0, z1, // invokestatic baz
                    0x2b, // aload_1
                    0xbf, // athrow
                    0xb1, // return
                ],
            )
            .catch(0, 3, 9, exception)
            .catch(0, 3, 19, 0)
            .catch(9, 13, 19, 0),
        ),
    );
    let unit = decompile(&builder.build()).unwrap();
    let guard = method(&unit, "guard").body.as_ref().unwrap();
    let tries: Vec<&StructuredStmt> = guard
        .statements
        .iter()
        .filter(|s| matches!(s, StructuredStmt::TryCatch { .. }))
        .collect();
    match tries.as_slice() {
        [StructuredStmt::TryCatch {
            try_body,
            catches,
            finally_body: Some(finally_body),
        }] => {
            assert!(calls(try_body, "foo"));
            assert!(!calls(try_body, "baz"));
            assert_eq!(catches.len(), 1);
            assert_eq!(catches[0].exception_types, vec!["java/lang/RuntimeException".to_string()]);
            assert_eq!(catches[0].var.as_ref().map(|v| v.slot), Some(0));
            assert!(calls(&catches[0].body, "bar"));
            assert!(!calls(&catches[0].body, "baz"));
            assert_eq!(code_of(finally_body).len(), 1);
            assert!(calls(finally_body, "baz"));
        }
        other => panic!("expected one try statement, got {:?}", other),
    }
}
