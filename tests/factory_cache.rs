//! Template caching in `MysqldFactory`.
#![cfg(unix)]

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use color_eyre::eyre::{Context, Result, eyre};
use mysqld_ephemeral::test_support::{FakeServerSandbox, fake_config, fake_sandbox};
use mysqld_ephemeral::{Initializer, InstanceErrorKind, MysqldFactory, MysqldInstance};
use rstest::rstest;

#[path = "support/sandbox.rs"]
mod sandbox;

use sandbox::utf8_tempdir;

const SEED_FILE: &str = "seeded.txt";

/// Initializer that writes a marker into the running seed and counts calls.
fn counting_initializer(calls: &Arc<AtomicUsize>) -> Initializer {
    let calls = Arc::clone(calls);
    Arc::new(move |instance: &MysqldInstance| -> color_eyre::Result<()> {
        if !instance.is_alive() {
            return Err(eyre!("seed server should be running"));
        }
        calls.fetch_add(1, Ordering::SeqCst);
        fs::write(instance.data_directory().join(SEED_FILE), "fixture")
            .context("write seed marker")?;
        Ok(())
    })
}

fn assert_seeded(instance: &MysqldInstance) -> Result<()> {
    let contents = fs::read_to_string(instance.data_directory().join(SEED_FILE))
        .context("read seed marker")?;
    assert_eq!(contents, "fixture");
    Ok(())
}

#[rstest]
fn factory_without_cache_builds_fresh_instances(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let factory = MysqldFactory::new(fake_config(fake_sandbox.mysqld()));

    let instance = factory.create()?;

    assert!(instance.is_alive());
    assert!(instance.owns_base_dir());
    assert!(factory.template_dir().is_none());
    Ok(())
}

#[rstest]
fn initializer_runs_once_for_many_instances(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = MysqldFactory::new(fake_config(fake_sandbox.mysqld()))
        .with_template_cache()
        .with_initializer("seed-v1", counting_initializer(&calls));

    let first = factory.create()?;
    let second = factory.create()?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_ne!(first.base_dir(), second.base_dir());
    assert_seeded(&first)?;
    assert_seeded(&second)?;
    assert!(first.is_alive() && second.is_alive());

    let template = factory
        .template_dir()
        .ok_or_else(|| eyre!("template should be recorded"))?;
    assert!(template.join("mysql").is_dir());
    assert!(
        !template
            .parent()
            .is_some_and(|base| base.join("tmp/mysqld.pid").exists()),
        "seed server should be stopped"
    );
    Ok(())
}

#[rstest]
fn clear_cache_forces_rebuild(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = MysqldFactory::new(fake_config(fake_sandbox.mysqld()))
        .with_template_cache()
        .with_initializer("seed-v1", counting_initializer(&calls));

    drop(factory.create()?);
    let template = factory
        .template_dir()
        .ok_or_else(|| eyre!("template should be recorded"))?;

    factory.clear_cache();
    assert!(factory.template_dir().is_none());
    assert!(!template.exists(), "cleared template should be deleted");

    let instance = factory.create()?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_seeded(&instance)?;
    Ok(())
}

#[rstest]
fn cache_root_is_shared_between_factories(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let (_cache_guard, cache_root) = utf8_tempdir()?;
    let calls = Arc::new(AtomicUsize::new(0));
    let build = || {
        MysqldFactory::new(fake_config(fake_sandbox.mysqld()))
            .with_cache_root(&cache_root)
            .with_initializer("seed-v1", counting_initializer(&calls))
    };

    let first_factory = build();
    let first = first_factory.create()?;
    drop(first_factory);

    let second_factory = build();
    let second = second_factory.create()?;

    assert_eq!(calls.load(Ordering::SeqCst), 1, "template should be reused");
    assert_seeded(&first)?;
    assert_seeded(&second)?;
    let template = second_factory
        .template_dir()
        .ok_or_else(|| eyre!("template should be recorded"))?;
    assert!(template.starts_with(&cache_root));

    second_factory.clear_cache();
    assert!(!template.exists());
    Ok(())
}

#[rstest]
fn initializer_identity_separates_templates(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let (_cache_guard, cache_root) = utf8_tempdir()?;
    let calls = Arc::new(AtomicUsize::new(0));
    let make = |id: &str| {
        MysqldFactory::new(fake_config(fake_sandbox.mysqld()))
            .with_cache_root(&cache_root)
            .with_initializer(id, counting_initializer(&calls))
    };

    let v1 = make("seed-v1");
    let v2 = make("seed-v2");
    drop(v1.create()?);
    drop(v2.create()?);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_ne!(v1.template_dir(), v2.template_dir());
    Ok(())
}

#[rstest]
fn concurrent_creates_build_template_once(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = MysqldFactory::new(fake_config(fake_sandbox.mysqld()))
        .with_template_cache()
        .with_initializer("seed-v1", counting_initializer(&calls));

    let instances = thread::scope(|scope| {
        let handles: Vec<_> = (0..3).map(|_| scope.spawn(|| factory.create())).collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| eyre!("create thread panicked"))?
                    .map_err(color_eyre::Report::from)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for instance in &instances {
        assert!(instance.is_alive());
        assert_seeded(instance)?;
    }
    Ok(())
}

#[rstest]
fn failing_initializer_surfaces_error(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let factory = MysqldFactory::new(fake_config(fake_sandbox.mysqld()))
        .with_template_cache()
        .with_initializer(
            "broken",
            Arc::new(|_: &MysqldInstance| -> color_eyre::Result<()> {
                Err(eyre!("schema script failed"))
            }),
        );

    let Err(err) = factory.create() else {
        return Err(eyre!("create should fail when the initializer fails"));
    };

    assert_eq!(err.kind(), InstanceErrorKind::Setup);
    let report = err.into_report();
    assert!(
        report
            .chain()
            .any(|cause| cause.to_string().contains("schema script failed")),
        "{report:?}"
    );
    assert!(factory.template_dir().is_none());
    Ok(())
}
