//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 責務
//! - 能力の注入（scheduler, supervisor, id generator, clock）
//! - オプションツリーの初期化と呼び出し側の configure 実行
//! - 返す前に PREBOOT に入る
//!
//! # Fail-fast 設計
//! 設定エラーは `build()` が返す。configure に失敗したアプリケーションは起動しない。

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::domain::options::{self, MergeMode};
use crate::domain::{AppError, KeyPath, Phase};
use crate::impls::TokioLocalScheduler;
use crate::ports::{Clock, IdGenerator, LogSupervisor, Scheduler, SequentialIds, Supervisor, SystemClock};

use super::{
    AppInner, Application, ChildFailurePolicy, ConfigStore, ErrorQueue, EventBus, PhaseMachine,
    PluginRegistry, WaitGate,
};

type Configure = Box<dyn FnOnce(&Application) -> Result<(), AppError>>;

/// AppBuilder は [`Application`] を構築する
///
/// # 使用例
/// ```ignore
/// let app = Application::builder()
///     .name("api")
///     .options(json!({ "port": 8080 }))
///     .configure(|app| {
///         app.startup(|app| { /* ... */ Ok(()) });
///         Ok(())
///     })
///     .build()?;
/// ```
pub struct AppBuilder {
    name: Option<String>,
    options: Value,
    defaults: Value,
    configure: Option<Configure>,
    scheduler: Rc<dyn Scheduler>,
    supervisor: Rc<dyn Supervisor>,
    id_generator: Box<dyn IdGenerator>,
    clock: Box<dyn Clock>,
    child_failure: ChildFailurePolicy,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            options: Value::Null,
            defaults: Value::Null,
            configure: None,
            scheduler: Rc::new(TokioLocalScheduler),
            supervisor: Rc::new(LogSupervisor),
            id_generator: Box::new(SequentialIds),
            clock: Box::new(SystemClock),
            child_failure: ChildFailurePolicy::default(),
        }
    }

    /// アプリケーション名。省略時は生成した ID
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 初期オプションツリー。`configure` より前にマージする
    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// 祖先チェーンの後に参照するフォールバック値
    ///
    /// 組み込みのデフォルト（`cwd`, `env`, `publicKeys`）に重ねる。
    pub fn defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }

    /// オプション設定後、PREBOOT の前に 1 回だけ実行する
    pub fn configure(
        mut self,
        configure: impl FnOnce(&Application) -> Result<(), AppError> + 'static,
    ) -> Self {
        self.configure = Some(Box::new(configure));
        self
    }

    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn supervisor(mut self, supervisor: Rc<dyn Supervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn id_generator(mut self, id_generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Box::new(id_generator);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn child_failure(mut self, policy: ChildFailurePolicy) -> Self {
        self.child_failure = policy;
        self
    }

    /// アプリケーションを構築して PREBOOT に入る
    ///
    /// # Errors
    /// - `options` が object でなければ `AppError::InvalidOption`
    /// - `configure` が返したエラー
    pub fn build(self) -> Result<Application, AppError> {
        let id = self.id_generator.generate_app_id();
        let name = self.name.unwrap_or_else(|| id.to_string());

        let mut defaults = self.defaults;
        options::merge(&mut defaults, ConfigStore::builtin_defaults(), MergeMode::FillMissing);

        let inner = Rc::new_cyclic(|weak| AppInner {
            id,
            name,
            created_at: self.clock.now(),
            parent: RefCell::new(None),
            config: RefCell::new(ConfigStore::new()),
            defaults: Rc::new(defaults),
            machine: RefCell::new(PhaseMachine::new()),
            errors: RefCell::new(ErrorQueue::new()),
            events: RefCell::new(EventBus::new()),
            plugins: RefCell::new(PluginRegistry::new()),
            gate: WaitGate::new(Application::gate_completion(weak.clone())),
            scheduler: self.scheduler,
            supervisor: self.supervisor,
            child_failure: self.child_failure,
        });
        let app = Application { inner };

        app.set(KeyPath::root(), self.options)?;
        if let Some(configure) = self.configure {
            configure(&app)?;
        }

        tracing::debug!(app = %app.fullname(), id = %app.id(), "application created");
        app.enter(Phase::BEGIN);
        Ok(app)
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type FactoryFn = dyn Fn(&Application, &Value) -> Result<(), AppError>;

/// AppFactory は設定済みアプリケーションを必要に応じて構築する
///
/// `Plugin::Factory` でマウントすると、子はホストの scheduler と supervisor を共有する。
/// clone は同じ factory として扱う。
#[derive(Clone)]
pub struct AppFactory {
    inner: Rc<FactoryInner>,
}

struct FactoryInner {
    name: Option<String>,
    configure: Box<FactoryFn>,
}

impl AppFactory {
    pub fn new(configure: impl Fn(&Application, &Value) -> Result<(), AppError> + 'static) -> Self {
        Self {
            inner: Rc::new(FactoryInner {
                name: None,
                configure: Box::new(configure),
            }),
        }
    }

    pub fn named(
        name: impl Into<String>,
        configure: impl Fn(&Application, &Value) -> Result<(), AppError> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(FactoryInner {
                name: Some(name.into()),
                configure: Box::new(configure),
            }),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// デフォルトの能力で構築
    pub fn build(&self, options: Value) -> Result<Application, AppError> {
        self.build_with(AppBuilder::new(), options)
    }

    /// `builder` の上に構築する。builder 側の名前が factory の名前より優先
    pub fn build_with(&self, mut builder: AppBuilder, options: Value) -> Result<Application, AppError> {
        if builder.name.is_none() {
            builder.name = self.inner.name.clone();
        }
        let factory = self.clone();
        builder
            .configure(move |app| (factory.inner.configure)(app, &options))
            .build()
    }

    /// `host` の能力を共有する子を構築
    pub(crate) fn build_for(&self, host: &Application, options: Value) -> Result<Application, AppError> {
        let builder = AppBuilder::new()
            .scheduler(host.inner.scheduler.clone())
            .supervisor(host.inner.supervisor.clone())
            .child_failure(host.inner.child_failure);
        self.build_with(builder, options)
    }

    pub fn ptr_eq(&self, other: &AppFactory) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for AppFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppFactory").field("name", &self.inner.name).finish()
    }
}
