//! Integration tests for staging operations.
//!
//! These tests drive the public `Engine` API against an in-memory store
//! seeded with a small site: a sitemap item, its page with one container,
//! and an inherited template.

use std::sync::Arc;

use sitestage::core::config::Config;
use sitestage::core::tree::{NewNode, Tree};
use sitestage::core::types::{
    ChannelId, EditableState, Fingerprint, NodeId, NodeKind, NodeName, RelPath, UserId, VersionStamp,
    PAGE_KEY, TEMPLATE_KEY,
};
use sitestage::engine::{
    ChangeEvent, ChangeEventBus, ChangeKind, Context, CreateSpec, Engine, ErrorKind,
    ListenerError, Scope, StagingError, Update,
};
use sitestage::store::{Channel, MemoryStore, Tier};

// =============================================================================
// Test Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn path(s: &str) -> RelPath {
    RelPath::parse(s).expect("valid path")
}

fn name(s: &str) -> NodeName {
    NodeName::new(s).expect("valid name")
}

fn ctx(user: &str) -> Context {
    Context::new(UserId::new(user).expect("valid user"))
}

fn channel_id() -> ChannelId {
    ChannelId::new("intranet").expect("valid channel")
}

/// Live tier:
///
/// ```text
/// templates/base
/// workspace/sitemap/home          page = workspace/pages/home
/// workspace/pages/home            template = templates/base
/// workspace/pages/home/main/teaser
/// ```
fn seeded_live() -> Tree {
    let mut live = Tree::new();
    let (templates, _) = live.ensure_path(&path("templates")).unwrap();
    live.add_child(templates, NewNode::new(name("base"), NodeKind::Template), None)
        .unwrap();

    let (sitemap, _) = live.ensure_path(&path("workspace/sitemap")).unwrap();
    let item = live
        .add_child(sitemap, NewNode::new(name("home"), NodeKind::SitemapItem), None)
        .unwrap();
    live.set_property(item, PAGE_KEY, "workspace/pages/home".into())
        .unwrap();

    let (pages, _) = live.ensure_path(&path("workspace/pages")).unwrap();
    let home = live
        .add_child(pages, NewNode::new(name("home"), NodeKind::Page), None)
        .unwrap();
    live.set_property(home, TEMPLATE_KEY, "templates/base".into())
        .unwrap();
    let main = live
        .add_child(home, NewNode::new(name("main"), NodeKind::Container), None)
        .unwrap();
    live.add_child(main, NewNode::new(name("teaser"), NodeKind::ContainerItem), None)
        .unwrap();
    live
}

struct Site {
    engine: Engine,
    channel: ChannelId,
}

impl Site {
    fn new() -> Self {
        Self::with_bus(ChangeEventBus::new())
    }

    fn with_bus(bus: ChangeEventBus) -> Self {
        init_tracing();
        let engine = Engine::new(Arc::new(MemoryStore::new()), Config::default(), bus);
        let channel = channel_id();
        engine
            .register_channel(Channel::from_live(channel.clone(), seeded_live()).unwrap())
            .unwrap();
        Self { engine, channel }
    }

    fn id(&self, p: &str) -> NodeId {
        self.engine
            .lookup(&self.channel, Tier::Preview, &path(p))
            .unwrap()
            .unwrap_or_else(|| panic!("no preview node at {p}"))
            .id
    }

    fn preview_has(&self, p: &str) -> bool {
        self.engine
            .lookup(&self.channel, Tier::Preview, &path(p))
            .unwrap()
            .is_some()
    }

    fn live_has(&self, p: &str) -> bool {
        self.engine
            .lookup(&self.channel, Tier::Live, &path(p))
            .unwrap()
            .is_some()
    }

    fn scope(&self, users: &[&str]) -> Scope {
        Scope::new(
            self.channel.clone(),
            users.iter().map(|u| UserId::new(*u).unwrap()),
        )
    }

    fn fingerprint(&self, tier: Tier) -> Fingerprint {
        self.engine.fingerprint(&self.channel, tier).unwrap()
    }
}

// =============================================================================
// Locking
// =============================================================================

#[test]
fn ancestor_lock_blocks_other_users() {
    let site = Site::new();
    let alice = ctx("alice");
    let bob = ctx("bob");
    let home = site.id("workspace/pages/home");
    let main = site.id("workspace/pages/home/main");
    let sitemap = site.id("workspace/sitemap");

    site.engine
        .update(&alice, &site.channel, &Update::new(home).set("title", "Home"))
        .unwrap();

    let update = site
        .engine
        .update(&bob, &site.channel, &Update::new(main).set("layout", "wide"))
        .unwrap_err();
    assert_eq!(update.kind(), ErrorKind::ItemAlreadyLocked);

    let rename = site.engine.rename(&bob, &site.channel, main, "primary").unwrap_err();
    assert_eq!(rename.kind(), ErrorKind::ItemAlreadyLocked);

    let moved = site
        .engine
        .move_node(&bob, &site.channel, main, Some(sitemap))
        .unwrap_err();
    assert_eq!(moved.kind(), ErrorKind::ItemAlreadyLocked);
}

#[test]
fn descendant_lock_blocks_ancestor_updates() {
    let site = Site::new();
    let main = site.id("workspace/pages/home/main");
    let home = site.id("workspace/pages/home");
    site.engine
        .update(&ctx("alice"), &site.channel, &Update::new(main).set("layout", "wide"))
        .unwrap();

    let err = site
        .engine
        .update(&ctx("bob"), &site.channel, &Update::new(home).set("title", "x"))
        .unwrap_err();
    assert!(matches!(err, StagingError::ItemAlreadyLocked { .. }));
}

#[test]
fn owner_may_add_children_below_own_lock() {
    let site = Site::new();
    let alice = ctx("alice");
    let home = site.id("workspace/pages/home");
    let main = site.id("workspace/pages/home/main");
    site.engine.acquire_lock(&alice, &site.channel, home, None).unwrap();

    let banner = site
        .engine
        .create(
            &alice,
            &site.channel,
            CreateSpec::new("banner", NodeKind::ContainerItem),
            Some(main),
        )
        .unwrap();
    let info = site.engine.lock_info(&site.channel, banner).unwrap().unwrap();
    assert_eq!(info.holder, home);
    assert_eq!(info.owner, alice.user);
}

#[test]
fn stale_stamp_conflicts_unless_reentrant() {
    let site = Site::new();
    let alice = ctx("alice");
    let home = site.id("workspace/pages/home");
    let stale = site.engine.node(&site.channel, home).unwrap().version;

    site.engine.acquire_lock(&alice, &site.channel, home, None).unwrap();
    // The owner's stale stamp is accepted.
    site.engine
        .update(
            &alice,
            &site.channel,
            &Update::new(home).set("title", "A").expect(stale),
        )
        .unwrap();
    site.engine
        .publish(&alice, &site.scope(&["alice"]))
        .unwrap();

    let err = site
        .engine
        .update(
            &ctx("bob"),
            &site.channel,
            &Update::new(home).set("title", "B").expect(stale),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn foreign_ancestor_lock_blocks_every_operation() {
    let site = Site::new();
    let alice = ctx("alice");
    let pages = site.id("workspace/pages");
    let home = site.id("workspace/pages/home");
    let main = site.id("workspace/pages/home/main");
    site.engine.acquire_lock(&ctx("bob"), &site.channel, home, None).unwrap();
    let before = site.fingerprint(Tier::Preview);
    let version = site.engine.node(&site.channel, main).unwrap().version;

    let engine = &site.engine;
    let channel = &site.channel;
    let attempts: Vec<(&str, Result<(), StagingError>)> = vec![
        ("update", engine.update(&alice, channel, &Update::new(main).set("layout", "wide"))),
        ("rename", engine.rename(&alice, channel, main, "primary")),
        ("rename to same name", engine.rename(&alice, channel, main, "main")),
        ("move", engine.move_node(&alice, channel, main, Some(pages))),
        ("move to same parent", engine.move_node(&alice, channel, main, Some(home))),
        ("delete", engine.delete(&alice, channel, main)),
        ("lock", engine.acquire_lock(&alice, channel, main, None).map(|_| ())),
        (
            "create",
            engine
                .create(&alice, channel, CreateSpec::new("promo", NodeKind::ContainerItem), Some(main))
                .map(|_| ()),
        ),
    ];
    for (op, result) in attempts {
        let err = result.expect_err(op);
        assert_eq!(err.kind(), ErrorKind::ItemAlreadyLocked, "{op}");
    }

    assert_eq!(site.fingerprint(Tier::Preview), before);
    assert_eq!(site.engine.node(&site.channel, main).unwrap().version, version);
    let pending = site.engine.pending_changes(&site.channel).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[&UserId::new("bob").unwrap()], vec![path("workspace/pages/home")]);
}

#[test]
fn every_edit_advances_version() {
    let site = Site::new();
    let alice = ctx("alice");
    let version = |id: NodeId| site.engine.node(&site.channel, id).unwrap().version;
    let pages = site.id("workspace/pages");
    let home = site.id("workspace/pages/home");
    let main = site.id("workspace/pages/home/main");
    let item = site.id("workspace/sitemap/home");

    let archive = site
        .engine
        .create(&alice, &site.channel, CreateSpec::new("archive", NodeKind::Folder), Some(pages))
        .unwrap();
    assert!(version(archive) > VersionStamp::initial());

    let before = version(home);
    site.engine
        .update(&alice, &site.channel, &Update::new(home).set("title", "Home"))
        .unwrap();
    assert!(version(home) > before);

    // Covered by the lock on home.
    let before = version(main);
    site.engine.delete(&alice, &site.channel, main).unwrap();
    assert!(version(main) > before);

    let before = version(item);
    site.engine.rename(&alice, &site.channel, item, "start").unwrap();
    assert!(version(item) > before);

    let before = version(home);
    site.engine
        .move_node(&alice, &site.channel, home, Some(archive))
        .unwrap();
    assert!(version(home) > before);

    for id in [archive, home, item] {
        let node = site.engine.node(&site.channel, id).unwrap();
        assert_eq!(node.lock.unwrap().version_stamp, node.version, "{}", node.path);
    }
}

#[test]
fn fresh_channel_collections_do_not_block_other_users() {
    init_tracing();
    let engine = Engine::new(Arc::new(MemoryStore::new()), Config::default(), ChangeEventBus::new());
    let channel = channel_id();
    engine.register_channel(Channel::new(channel.clone())).unwrap();
    let (alice, bob) = (ctx("alice"), ctx("bob"));
    let empty = engine.fingerprint(&channel, Tier::Preview).unwrap();

    engine
        .create(&alice, &channel, CreateSpec::new("news", NodeKind::SitemapItem), None)
        .unwrap();
    engine
        .create(&bob, &channel, CreateSpec::new("landing", NodeKind::Page), None)
        .unwrap();

    let pending = engine.pending_changes(&channel).unwrap();
    assert_eq!(pending[&alice.user], vec![path("workspace/sitemap/news")]);
    assert_eq!(pending[&bob.user], vec![path("workspace/pages/landing")]);

    let scope = |ctx: &Context| Scope::new(channel.clone(), [ctx.user.clone()]);
    engine.discard_changes(&alice, &scope(&alice)).unwrap();
    let lookup = |p: &str| engine.lookup(&channel, Tier::Preview, &path(p)).unwrap();
    assert!(lookup("workspace/sitemap").is_none());
    assert!(lookup("workspace/pages/landing").is_some());

    engine.publish(&bob, &scope(&bob)).unwrap();
    assert!(engine
        .lookup(&channel, Tier::Live, &path("workspace/pages/landing"))
        .unwrap()
        .is_some());
    assert!(engine.pending_changes(&channel).unwrap().is_empty());
    assert_ne!(engine.fingerprint(&channel, Tier::Preview).unwrap(), empty);
}

// =============================================================================
// Naming
// =============================================================================

#[test]
fn name_collisions_are_suffixed_monotonically() {
    let site = Site::new();
    let alice = ctx("alice");
    let mut names = Vec::new();
    for _ in 0..3 {
        let id = site
            .engine
            .create(&alice, &site.channel, CreateSpec::new("foo", NodeKind::Page), None)
            .unwrap();
        names.push(site.engine.node(&site.channel, id).unwrap().name.to_string());
    }
    assert_eq!(names, vec!["foo", "foo-1", "foo-2"]);
}

#[test]
fn disallowed_names_are_rejected() {
    let site = Site::new();
    let alice = ctx("alice");
    for bad in ["a:b", "a?b", "a;b", "a#b", "a\\b", "a%2Fb", "a%3bb"] {
        let err = site
            .engine
            .create(&alice, &site.channel, CreateSpec::new(bad, NodeKind::Page), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName, "{bad}");
    }
}

#[test]
fn inherited_mirror_blocks_create() {
    let site = Site::new();
    let err = site
        .engine
        .create(
            &ctx("alice"),
            &site.channel,
            CreateSpec::new("base", NodeKind::Template),
            None,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ItemExistsOutsideWorkspace);
}

// =============================================================================
// Delete and move
// =============================================================================

#[test]
fn delete_with_live_counterpart_keeps_marker() {
    let site = Site::new();
    let alice = ctx("alice");
    let home = site.id("workspace/pages/home");
    site.engine.delete(&alice, &site.channel, home).unwrap();

    let node = site.engine.node(&site.channel, home).unwrap();
    assert_eq!(node.state, EditableState::Deleted);
    assert_eq!(node.lock.unwrap().owner, alice.user);
    assert!(site.preview_has("workspace/pages/home/main/teaser"));
}

#[test]
fn delete_without_live_counterpart_removes_subtree() {
    let site = Site::new();
    let alice = ctx("alice");
    let draft = site
        .engine
        .create(&alice, &site.channel, CreateSpec::new("draft", NodeKind::Page), None)
        .unwrap();
    site.engine
        .create(
            &alice,
            &site.channel,
            CreateSpec::new("body", NodeKind::Container),
            Some(draft),
        )
        .unwrap();

    site.engine.delete(&alice, &site.channel, draft).unwrap();
    assert!(!site.preview_has("workspace/pages/draft"));
    assert!(!site.preview_has("workspace/pages/draft/body"));
}

#[test]
fn moves_into_self_or_descendant_fail() {
    let site = Site::new();
    let alice = ctx("alice");
    let home = site.id("workspace/pages/home");
    let main = site.id("workspace/pages/home/main");
    for target in [home, main] {
        let err = site
            .engine
            .move_node(&alice, &site.channel, home, Some(target))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMoveToSelfOrDescendant);
    }
}

#[test]
fn moves_out_of_workspace_fail() {
    let site = Site::new();
    let templates = site.id("templates");
    let home = site.id("workspace/pages/home");
    let err = site
        .engine
        .move_node(&ctx("alice"), &site.channel, home, Some(templates))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ItemNotCorrectLocation);
}

#[test]
fn published_move_relocates_live_node() {
    let site = Site::new();
    let alice = ctx("alice");
    let home = site.id("workspace/pages/home");
    let pages = site.id("workspace/pages");
    let archive = site
        .engine
        .create(
            &alice,
            &site.channel,
            CreateSpec::new("archive", NodeKind::Folder),
            Some(pages),
        )
        .unwrap();
    site.engine
        .move_node(&alice, &site.channel, home, Some(archive))
        .unwrap();
    assert!(site.preview_has("workspace/pages/home"));

    site.engine.publish(&alice, &site.scope(&["alice"])).unwrap();
    assert!(!site.live_has("workspace/pages/home"));
    assert!(site.live_has("workspace/pages/archive/home/main/teaser"));
    assert!(!site.preview_has("workspace/pages/home"));
    assert_eq!(site.fingerprint(Tier::Preview), site.fingerprint(Tier::Live));
}

// =============================================================================
// Publish and discard
// =============================================================================

#[test]
fn publish_is_idempotent() {
    let site = Site::new();
    let alice = ctx("alice");
    let home = site.id("workspace/pages/home");
    site.engine
        .update(&alice, &site.channel, &Update::new(home).set("title", "Welcome"))
        .unwrap();
    site.engine
        .create(&alice, &site.channel, CreateSpec::new("news", NodeKind::SitemapItem), None)
        .unwrap();

    let scope = site.scope(&["alice"]);
    assert_eq!(site.engine.publish(&alice, &scope).unwrap(), 2);
    let live = site.fingerprint(Tier::Live);
    let preview = site.fingerprint(Tier::Preview);
    assert_eq!(live, preview);

    assert_eq!(site.engine.publish(&alice, &scope).unwrap(), 0);
    assert_eq!(site.engine.publish(&alice, &scope).unwrap(), 0);
    assert_eq!(site.fingerprint(Tier::Live), live);
    assert_eq!(site.fingerprint(Tier::Preview), preview);
    assert!(site.engine.pending_changes(&site.channel).unwrap().is_empty());
}

#[test]
fn publish_only_resolves_scope_users() {
    let site = Site::new();
    let home = site.id("workspace/pages/home");
    site.engine
        .update(&ctx("alice"), &site.channel, &Update::new(home).set("title", "A"))
        .unwrap();
    site.engine
        .create(&ctx("bob"), &site.channel, CreateSpec::new("news", NodeKind::SitemapItem), None)
        .unwrap();

    site.engine.publish(&ctx("bob"), &site.scope(&["bob"])).unwrap();
    assert!(site.live_has("workspace/sitemap/news"));
    let live_home = site
        .engine
        .lookup(&site.channel, Tier::Live, &path("workspace/pages/home"))
        .unwrap()
        .unwrap();
    assert!(live_home.property_str("title").is_none());

    let pending = site.engine.pending_changes(&site.channel).unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending.contains_key(&UserId::new("alice").unwrap()));
}

#[test]
fn publish_of_deletion_removes_live_node() {
    let site = Site::new();
    let alice = ctx("alice");
    let teaser = site.id("workspace/pages/home/main/teaser");
    site.engine.delete(&alice, &site.channel, teaser).unwrap();
    site.engine.publish(&alice, &site.scope(&["alice"])).unwrap();
    assert!(!site.live_has("workspace/pages/home/main/teaser"));
    assert!(!site.preview_has("workspace/pages/home/main/teaser"));
    assert!(site.live_has("workspace/pages/home/main"));
}

#[test]
fn discard_restores_preview_from_live() {
    let site = Site::new();
    let before = site.fingerprint(Tier::Preview);
    let alice = ctx("alice");
    let home = site.id("workspace/pages/home");
    let item = site.id("workspace/sitemap/home");

    site.engine
        .update(&alice, &site.channel, &Update::new(home).set("title", "Draft").remove(TEMPLATE_KEY))
        .unwrap();
    site.engine.rename(&alice, &site.channel, item, "start").unwrap();
    site.engine
        .create(&alice, &site.channel, CreateSpec::new("news", NodeKind::SitemapItem), None)
        .unwrap();
    assert_ne!(site.fingerprint(Tier::Preview), before);

    let resolved = site.engine.discard_changes(&alice, &site.scope(&["alice"])).unwrap();
    assert!(resolved >= 3);
    assert_eq!(site.fingerprint(Tier::Preview), before);
    assert!(site.engine.pending_changes(&site.channel).unwrap().is_empty());
}

#[test]
fn discard_under_subtree_root_leaves_other_changes() {
    let site = Site::new();
    let alice = ctx("alice");
    let home = site.id("workspace/pages/home");
    site.engine
        .update(&alice, &site.channel, &Update::new(home).set("title", "Draft"))
        .unwrap();
    site.engine
        .create(&alice, &site.channel, CreateSpec::new("news", NodeKind::SitemapItem), None)
        .unwrap();

    let scope = site.scope(&["alice"]).under(path("workspace/sitemap"));
    assert_eq!(site.engine.discard_changes(&alice, &scope).unwrap(), 1);
    assert!(!site.preview_has("workspace/sitemap/news"));
    let home = site.engine.node(&site.channel, home).unwrap();
    assert_eq!(home.property_str("title"), Some("Draft"));
}

// =============================================================================
// Events
// =============================================================================

#[test]
fn vetoed_create_leaves_no_pending_changes() {
    let mut bus = ChangeEventBus::new();
    bus.register(|event: &mut ChangeEvent| {
        let reserved = event
            .after
            .as_ref()
            .is_some_and(|n| n.path.name().is_some_and(|n| n.as_str() == "admin"));
        if event.kind == ChangeKind::Create && reserved {
            event.veto(ListenerError::Client(StagingError::InvalidName(
                "admin is reserved".into(),
            )));
        }
    });
    let site = Site::with_bus(bus);
    let before = site.fingerprint(Tier::Preview);

    let err = site
        .engine
        .create(&ctx("alice"), &site.channel, CreateSpec::new("admin", NodeKind::Page), None)
        .unwrap_err();
    assert!(err.is_client());
    assert_eq!(err.kind(), ErrorKind::InvalidName);
    assert!(site.engine.pending_changes(&site.channel).unwrap().is_empty());
    assert_eq!(site.fingerprint(Tier::Preview), before);

    site.engine
        .create(&ctx("alice"), &site.channel, CreateSpec::new("about", NodeKind::Page), None)
        .unwrap();
    assert!(site.preview_has("workspace/pages/about"));
}
