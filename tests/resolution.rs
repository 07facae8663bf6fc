mod common;

use common::EventLog;
use composable_namespace::{Error, Factory, Function, Namespace, Value, uses};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn app_factory() -> Factory {
    Factory::constructor(|args| {
        let [config, page] = args.as_slice() else {
            anyhow::bail!("expected two arguments, got {}", args.len());
        };
        Ok(Value::from(json!({
            "config": config.to_json(),
            "page": page.to_json(),
        })))
    })
}

#[test]
fn test_constructor_receives_use_dependencies_in_order() {
    let namespace = Namespace::new();
    namespace
        .declare("app.Config", uses::<_, &str>([]), common::value(json!({"path": "/etc/app"})))
        .unwrap();
    namespace
        .declare("app.Page", uses::<_, &str>([]), common::value(json!({"name": "home"})))
        .unwrap();
    namespace
        .declare("app.App", uses(["app.Config", "app.Page"]), app_factory())
        .unwrap();

    assert!(!namespace.exists("app.App"));
    namespace.ready();

    assert_eq!(
        common::json(&namespace, "app.App"),
        json!({"config": {"path": "/etc/app"}, "page": {"name": "home"}})
    );
    assert!(namespace.pending().is_empty());
    assert!(namespace.take_failures().is_empty());
}

#[test]
fn test_resolution_is_independent_of_registration_order() {
    let build = |dependencies_first: bool, config_first: bool| {
        let namespace = Namespace::new();
        let declare_dependencies = |namespace: &Namespace| {
            let mut entries = vec![
                ("app.Config", json!({"path": "/etc/app"})),
                ("app.Page", json!({"name": "home"})),
            ];
            if !config_first {
                entries.reverse();
            }
            for (name, data) in entries {
                namespace
                    .declare(name, uses::<_, &str>([]), common::value(data))
                    .unwrap();
            }
        };

        if dependencies_first {
            declare_dependencies(&namespace);
        }
        namespace
            .declare("app.App", uses(["app.Config", "app.Page"]), app_factory())
            .unwrap();
        namespace.ready();
        if !dependencies_first {
            declare_dependencies(&namespace);
        }
        common::json(&namespace, "app.App")
    };

    let expected = build(true, true);
    assert_eq!(build(true, false), expected);
    assert_eq!(build(false, true), expected);
    assert_eq!(build(false, false), expected);
}

#[test]
fn test_dependents_wait_for_late_providers() {
    let namespace = Namespace::new();
    let log = EventLog::default();
    namespace
        .declare("late.Consumer", uses(["late.Provider"]), log.recording("consumer", json!({})))
        .unwrap();
    namespace.ready();

    assert!(!namespace.exists("late.Consumer"));
    assert_eq!(namespace.pending().len(), 1);
    assert_eq!(namespace.pending()[0].owner, "late.Consumer");
    assert_eq!(namespace.pending()[0].waiting_on, ["late.Provider"]);

    namespace.provide("late.Provider", common::object(json!({}))).unwrap();
    assert!(namespace.exists("late.Consumer"));
    assert!(namespace.pending().is_empty());
    assert_eq!(log.events(), ["consumer"]);
}

#[test]
fn test_dependents_are_notified_once_per_name() {
    let namespace = Namespace::new();
    let builds = Rc::new(Cell::new(0));

    let counter = builds.clone();
    namespace
        .declare(
            "m.A",
            // Repeated and property-qualified references share one readiness slot.
            ["m.B", "m.B#inner", "m.C"],
            Factory::constructor(move |args| {
                counter.set(counter.get() + 1);
                assert_eq!(args.len(), 3);
                Ok(Value::from(json!({})))
            }),
        )
        .unwrap();
    namespace.ready();

    namespace
        .provide("m.B", common::object(json!({"inner": {"x": 1}})))
        .unwrap();
    assert_eq!(builds.get(), 0);
    namespace.provide("m.C", common::object(json!({}))).unwrap();
    assert_eq!(builds.get(), 1);

    assert!(namespace.provide("m.B", common::object(json!({}))).is_err());
    namespace
        .declare("m.D", uses(["m.B"]), common::constant(json!({})))
        .unwrap();
    assert!(namespace.exists("m.D"));
    namespace.provide("m.E", common::object(json!({}))).unwrap();
    assert_eq!(builds.get(), 1);
}

#[test]
fn test_property_paths_select_nested_values() {
    let namespace = Namespace::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    namespace
        .provide(
            "cfg.Settings",
            common::object(json!({
                "db": {"host": "localhost", "ports": [5432, 5433]},
                "empty": null,
            })),
        )
        .unwrap();

    let received = seen.clone();
    namespace
        .require(
            ["cfg.Settings#db.host", "cfg.Settings#db.ports.1", "cfg.Settings#db"],
            move |args| {
                received.borrow_mut().extend(args.iter().map(Value::to_json));
                Ok(())
            },
        )
        .unwrap();
    namespace.ready();

    assert_eq!(
        *seen.borrow(),
        [
            json!("localhost"),
            json!(5433),
            json!({"host": "localhost", "ports": [5432, 5433]}),
        ]
    );
}

#[test]
fn test_missing_property_fails_the_module() {
    let namespace = Namespace::new();
    namespace
        .provide("cfg.Settings", common::object(json!({"empty": null})))
        .unwrap();
    namespace
        .declare("cfg.Missing", ["cfg.Settings#db.host"], common::constant(json!({})))
        .unwrap();
    namespace
        .declare("cfg.Null", ["cfg.Settings#empty"], common::constant(json!({})))
        .unwrap();
    namespace.ready();

    let failures = namespace.take_failures();
    assert_eq!(failures.len(), 2);
    for failure in &failures {
        assert!(
            matches!(&failure.error, Error::PropertyNotFound { module, .. } if module == "cfg.Settings"),
            "{:?}",
            failure.error
        );
    }
    assert!(!namespace.exists("cfg.Missing"));
    assert!(!namespace.exists("cfg.Null"));
}

#[test]
fn test_property_access_on_function_module_fails() {
    let namespace = Namespace::new();
    namespace
        .provide("fn.Handler", Function::new(|_| Ok(Value::from(json!({})))))
        .unwrap();
    let called = Rc::new(Cell::new(false));
    let flag = called.clone();
    namespace
        .require(["fn.Handler#name"], move |_| {
            flag.set(true);
            Ok(())
        })
        .unwrap();
    namespace.ready();

    assert!(!called.get());
    let failures = namespace.take_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].owner, "<require #1>");
    assert!(matches!(
        &failures[0].error,
        Error::InvalidPropertyAccess { module, property } if module == "fn.Handler" && property == "name"
    ));
}

#[test]
fn test_requests_receive_only_use_dependencies() {
    let namespace = Namespace::new();
    namespace.provide("r.Data", common::object(json!({"n": 1}))).unwrap();
    namespace.provide("r.Mixin", common::object(json!({"m": 2}))).unwrap();

    let seen = Rc::new(RefCell::new(None));
    let received = seen.clone();
    namespace
        .require(["is:r.Mixin", "r.Data"], move |args| {
            *received.borrow_mut() = Some(args);
            Ok(())
        })
        .unwrap();
    namespace.ready();

    assert_eq!(*seen.borrow(), Some(vec![Value::from(json!({"n": 1}))]));
    // Requests bind nothing.
    assert_eq!(namespace.names(), ["r.Data", "r.Mixin"]);
}

#[test]
fn test_deferred_module_binds_on_completion() {
    let namespace = Namespace::new();
    let handle = Rc::new(RefCell::new(None));
    let slot = handle.clone();
    namespace.provide("io.Path", common::object(json!({"dir": "/tmp"}))).unwrap();
    namespace
        .declare(
            "io.Reader",
            uses(["io.Path"]),
            Factory::deferred(move |args, completion| {
                assert_eq!(completion.name(), "io.Reader");
                *slot.borrow_mut() = Some((args, completion));
                Ok(())
            }),
        )
        .unwrap();
    namespace
        .declare("io.Consumer", uses(["io.Reader"]), common::constant(json!({})))
        .unwrap();
    namespace.ready();

    assert!(!namespace.exists("io.Reader"));
    assert_eq!(namespace.pending().len(), 1);

    let (args, completion) = handle.borrow_mut().take().unwrap();
    assert_eq!(args, [Value::from(json!({"dir": "/tmp"}))]);
    completion.complete(common::object(json!({"open": true}))).unwrap();

    assert_eq!(common::json(&namespace, "io.Reader"), json!({"open": true}));
    assert!(namespace.exists("io.Consumer"));
    assert!(namespace.take_failures().is_empty());
}

#[test]
fn test_dropped_completion_fails_the_module() {
    let namespace = Namespace::new();
    namespace
        .declare("io.Lost", uses::<_, &str>([]), Factory::deferred(|_, _completion| Ok(())))
        .unwrap();
    namespace.ready();

    assert!(!namespace.exists("io.Lost"));
    assert_eq!(common::failure_owners(&namespace), ["io.Lost"]);
}

#[test]
fn test_declarations_after_ready_start_immediately() {
    let namespace = Namespace::new();
    namespace.ready();
    assert!(namespace.is_ready());

    namespace
        .declare("now.Base", uses::<_, &str>([]), common::value(json!({"ok": true})))
        .unwrap();
    assert!(namespace.exists("now.Base"));

    namespace
        .declare("now.Derived", uses(["now.Base"]), Factory::constructor(|args| Ok(args[0].clone())))
        .unwrap();
    assert_eq!(common::json(&namespace, "now.Derived"), json!({"ok": true}));
    assert!(namespace.startup_order().is_empty());
}

#[test]
fn test_factories_can_declare_further_modules() {
    let namespace = Namespace::new();
    let inner = namespace.clone();
    namespace
        .declare(
            "plugin.Host",
            uses::<_, &str>([]),
            Factory::constructor(move |_| {
                inner.declare("plugin.Extra", uses::<_, &str>([]), common::value(json!({"extra": true})))?;
                Ok(Value::from(json!({"host": inner.exists("plugin.Extra")})))
            }),
        )
        .unwrap();
    namespace
        .declare("plugin.User", uses(["plugin.Extra", "plugin.Host"]), Factory::constructor(|args| {
            Ok(Value::Data(json!([args[0].to_json(), args[1].to_json()])))
        }))
        .unwrap();
    namespace.ready();

    // plugin.Extra was declared during the drain and bound straight away.
    assert_eq!(common::json(&namespace, "plugin.Host"), json!({"host": true}));
    assert_eq!(
        common::json(&namespace, "plugin.User"),
        json!([{"extra": true}, {"host": true}])
    );
}
