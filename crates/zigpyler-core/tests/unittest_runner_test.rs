//! Runner completeness: one report line per test in declaration order,
//! lifecycle hooks around each test and each class, static skip
//! handling, and the specialized assertion expansions.

use zigpyler_core::{ImportRegistry, ZigpylerPipeline};

fn transpile(source: &str) -> String {
    ZigpylerPipeline::new().transpile(source).unwrap()
}

#[test]
fn one_runner_invocation_per_test_in_source_order() {
    let out = transpile(
        r#"
import unittest

class Suite(unittest.TestCase):
    def test_a(self):
        self.assertTrue(True)

    def test_b(self):
        self.assertTrue(True)

    def test_c(self):
        self.assertTrue(True)
"#,
    );
    assert_eq!(out.matches("try __results.record(").count(), 3, "{out}");
    let a = out.find("record(\"test_Suite_test_a\"").unwrap();
    let b = out.find("record(\"test_Suite_test_b\"").unwrap();
    let c = out.find("record(\"test_Suite_test_c\"").unwrap();
    assert!(a < b && b < c, "report order must follow declaration order");
}

#[test]
fn setup_and_teardown_bracket_each_test() {
    let out = transpile(
        r#"
import unittest

class Suite(unittest.TestCase):
    def setUp(self):
        self.n = 1

    def tearDown(self):
        self.n = 0

    def test_one(self):
        self.assertEqual(self.n, 1)
"#,
    );
    let runner_at = out.find("fn __test_Suite_test_one").unwrap();
    let runner = &out[runner_at..];
    let setup = runner.find("setUp(").unwrap();
    let test = runner.find("test_one(").unwrap();
    let teardown = runner.find("tearDown(").unwrap();
    assert!(setup < test && test < teardown, "{out}");
}

#[test]
fn class_level_hooks_bracket_the_class_block() {
    let out = transpile(
        r#"
import unittest

class Suite(unittest.TestCase):
    @classmethod
    def setUpClass(cls):
        pass

    @classmethod
    def tearDownClass(cls):
        pass

    def test_one(self):
        self.assertTrue(True)
"#,
    );
    let setup_at = out.find("Suite.setUpClass(").unwrap();
    let record_at = out.find("record(\"test_Suite_test_one\"").unwrap();
    let teardown_at = out.find("Suite.tearDownClass(").unwrap();
    assert!(setup_at < record_at && record_at < teardown_at, "{out}");
}

#[test]
fn literal_skipif_is_honored_statically() {
    let out = transpile(
        r#"
import unittest

class Suite(unittest.TestCase):
    @unittest.skipIf(True, "not ported")
    def test_skipped(self):
        self.assertTrue(True)

    def test_runs(self):
        self.assertTrue(True)
"#,
    );
    assert!(
        out.contains("recordSkip(\"test_Suite_test_skipped\", \"not ported\")"),
        "{out}"
    );
    assert!(out.contains("record(\"test_Suite_test_runs\""), "{out}");
    // The skipped test body never runs.
    assert!(!out.contains("__test_Suite_test_skipped(.{"), "{out}");
}

#[test]
fn skipped_module_condition_is_honored_through_the_registry() {
    let mut registry = ImportRegistry::with_defaults();
    registry.mark_skipped("numpy");
    let pipeline = ZigpylerPipeline::with_registry(registry);
    let out = pipeline
        .transpile(
            r#"
import unittest

class Suite(unittest.TestCase):
    @unittest.skipIf(numpy is None, "needs numpy")
    def test_numpy(self):
        self.assertTrue(True)
"#,
        )
        .unwrap();
    assert!(
        out.contains("recordSkip(\"test_Suite_test_numpy\", \"needs numpy\")"),
        "{out}"
    );
}

#[test]
fn assert_raises_checks_the_error_tag() {
    let out = transpile(
        r#"
import unittest

def boom():
    raise ValueError("bad")

class Suite(unittest.TestCase):
    def test_boom(self):
        self.assertRaises(ValueError, boom)
"#,
    );
    // The invocation goes through the shared callable dispatch and the
    // result must be an error for the assertion to pass.
    assert!(out.contains("if (boom()) |_|"), "{out}");
    assert!(out.contains("== error.ValueError"), "{out}");
    assert!(out.contains("return error.AssertionError;"), "{out}");
}

#[test]
fn assert_is_on_type_expands_to_comptime_check() {
    let out = transpile(
        r#"
import unittest

class Suite(unittest.TestCase):
    def test_type(self):
        x = 5
        self.assertIs(type(x), int)
"#,
    );
    assert!(
        out.contains("py.unittest.assertTrue(@TypeOf(x) == i64)"),
        "{out}"
    );
}

#[test]
fn non_fallible_assert_raises_target_reports_failure() {
    let out = transpile(
        r#"
import unittest

def safe():
    return 1

class Suite(unittest.TestCase):
    def test_never_raises(self):
        self.assertRaises(ValueError, safe)
"#,
    );
    // A callee that cannot fail makes the assertion fail outright.
    assert!(out.contains("return error.AssertionError;"), "{out}");
}
