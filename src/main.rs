#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::cmp::Ordering;
use std::io::{BufRead, BufReader};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
#[cfg(windows)]
use std::os::windows::process::CommandExt;

use anyhow::{Context as AnyhowCtx, Result};
use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use eframe::egui::{self, *};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

const APP_VERSION: &str = "0.1.0";
const PATCH_LIMIT: usize = 8;
const UNLOCK_CLICKS: u32 = 10;
const UNLOCK_HINT_FROM: u32 = 5;
const TOAST_TTL: Duration = Duration::from_secs(4);

const FUNCTION_PATCH_MARKER: &str = "功能补丁";
const SCRIPT_CONVERSION_MARKER: &str = "繁转简";

const PROJECT_URL: &str = "https://github.com/TonSHd/poebench-wizard";
const DOTNET8_URL: &str = "https://aka.ms/dotnet-core-applaunch?framework=Microsoft.NETCore.App&framework_version=8.0.0&arch=x64&rid=win10-x64";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

fn find_cjk_fonts() -> Vec<PathBuf> {
    let cjk_candidates = [
        "C:\\Windows\\Fonts\\msyh.ttc",
        "C:\\Windows\\Fonts\\simhei.ttf",
        "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
        "/usr/share/fonts/truetype/noto-cjk/NotoSansCJK-Regular.ttc",
        "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    ];
    let fallback_candidates = [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    ];

    let mut out = Vec::new();
    for candidates in [cjk_candidates.as_slice(), fallback_candidates.as_slice()] {
        if let Some(found) = candidates.iter().map(PathBuf::from).find(|p| p.exists()) {
            out.push(found);
        }
    }
    out
}

fn bench_exe() -> PathBuf {
    if let Ok(p) = std::env::var("POEBENCH_PATH") {
        let p = PathBuf::from(p);
        if p.exists() { return p; }
    }
    let exe_dir = std::env::current_exe().ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    let name = if cfg!(windows) { "PoeBench.exe" } else { "PoeBench" };
    exe_dir.join("bin").join(name)
}

fn bench_command() -> Command {
    let mut cmd = Command::new(bench_exe());
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecParams {
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patch: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    pub font_size_delta: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_fog: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimap_visibility: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_zoom: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_up: Option<f32>,
}

impl ExecParams {
    pub fn has_actionable(&self) -> bool {
        !self.patch.is_empty()
            || self.font.as_deref().is_some_and(|f| !f.is_empty())
            || self.font_size_delta != 0
            || self.remove_fog.is_some()
            || self.minimap_visibility.is_some()
            || self.camera_zoom.is_some()
            || self.light_up.is_some()
    }
}

pub fn patch_args(params: &ExecParams) -> Vec<String> {
    let mut args = vec!["patch".to_string(), "-p".to_string(), params.path.clone()];
    for p in &params.patch {
        args.push("-pf".to_string());
        args.push(p.clone());
    }
    if let Some(font) = params.font.as_deref().filter(|f| !f.is_empty()) {
        args.push("--font".to_string());
        args.push(font.to_string());
    }
    if params.font_size_delta != 0 {
        args.push("--font-size-delta".to_string());
        args.push(params.font_size_delta.to_string());
    }
    if let Some(v) = params.remove_fog {
        args.push("--remove-fog".to_string());
        args.push(v.to_string());
    }
    if let Some(v) = params.minimap_visibility {
        args.push("--minimap-visibility".to_string());
        args.push(v.to_string());
    }
    if let Some(v) = params.camera_zoom {
        args.push("--camera-zoom".to_string());
        args.push(v.to_string());
    }
    if let Some(v) = params.light_up {
        args.push("--light-up".to_string());
        args.push(v.to_string());
    }
    args
}

fn render_command(program: &Path, args: &[String]) -> String {
    let mut out = format!("\"{}\"", program.display());
    for a in args {
        if a.contains(' ') {
            out.push_str(&format!(" \"{a}\""));
        } else {
            out.push_str(&format!(" {a}"));
        }
    }
    out
}

pub fn is_game_archive_path(path: &str) -> bool {
    let p = path.trim().to_lowercase();
    p.ends_with(".ggpk") || p.ends_with(".bin")
}

fn file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

pub fn add_patches(list: &mut Vec<String>, incoming: impl IntoIterator<Item = String>) -> bool {
    for p in incoming {
        if !list.contains(&p) {
            list.push(p);
        }
    }
    if list.len() > PATCH_LIMIT {
        list.truncate(PATCH_LIMIT);
        return true;
    }
    false
}

pub fn has_script_conversion_patch(patches: &[String]) -> bool {
    patches.iter().any(|p| p.contains(SCRIPT_CONVERSION_MARKER))
}

pub fn effective_font(patches: &[String], choice: &str) -> Option<String> {
    if choice.is_empty() || has_script_conversion_patch(patches) {
        None
    } else {
        Some(choice.to_string())
    }
}

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"(?is)<VersionData>.*?<Version>(.*?)</Version>").unwrap();
}

pub fn client_version_from_xml(xml: &str) -> Option<String> {
    VERSION_RE.captures(xml).map(|c| c[1].trim().to_string())
}

fn client_version_near(install_path: &str) -> Result<String> {
    let dir = Path::new(install_path.trim())
        .parent()
        .context("install path has no parent directory")?;
    let xml_path = dir.join("TCLS").join("mmog_data.xml");
    let xml = std::fs::read_to_string(&xml_path)
        .with_context(|| format!("read {}", xml_path.display()))?;
    client_version_from_xml(&xml).context("no version tag in mmog_data.xml")
}

pub fn drop_stale_function_patch(params: &mut ExecParams, log: &mut Vec<String>) {
    let Some(function_patch) = params.patch.iter().find(|p| p.contains(FUNCTION_PATCH_MARKER)).cloned() else {
        return;
    };
    if !params.path.trim().to_lowercase().ends_with("content.ggpk") {
        return;
    }
    let version = match client_version_near(&params.path) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("skipping function patch version check: {e:#}");
            return;
        }
    };
    if version.is_empty() || function_patch.contains(&version) {
        return;
    }
    log.push(format!(
        "Error: game client version {version} does not match the function patch version, skipping the stale patch."
    ));
    log.push(format!("Stale patch name: {}", file_name(&function_patch)));
    params.patch.retain(|p| p != &function_patch);
}

fn leads_with_cjk(s: &str) -> bool {
    s.chars().next().is_some_and(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c))
}

pub fn sort_fonts(fonts: &mut [String]) {
    fonts.sort_by(|a, b| match (leads_with_cjk(a), leads_with_cjk(b)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a.cmp(b),
        (false, false) => a.to_lowercase().cmp(&b.to_lowercase()),
    });
}

pub fn font_matches(font: &str, keyword: &str) -> bool {
    keyword.is_empty() || font.to_lowercase().contains(&keyword.to_lowercase())
}

#[derive(Debug, Default)]
pub struct DragRegion {
    depth: u32,
}

impl DragRegion {
    pub fn enter(&mut self) { self.depth += 1; }
    pub fn leave(&mut self) { self.depth = self.depth.saturating_sub(1); }
    pub fn reset(&mut self) { self.depth = 0; }
    pub fn is_active(&self) -> bool { self.depth > 0 }
}

#[derive(Clone, Copy, Debug)]
pub struct Toggle<T: Copy> {
    pub enabled: bool,
    pub value: T,
}

impl<T: Copy> Toggle<T> {
    pub fn new(value: T) -> Self {
        Self { enabled: false, value }
    }
    pub fn emit(&self) -> Option<T> {
        if self.enabled { Some(self.value) } else { None }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub last_params: ExecParams,
    #[serde(default)]
    pub extras_unlocked: bool,
    pub saved_at: DateTime<Local>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_params: ExecParams::default(),
            extras_unlocked: false,
            saved_at: Local::now(),
        }
    }
}

impl Settings {
    pub fn load() -> Self {
        let path = Self::path();
        if path.exists() {
            if let Ok(data) = std::fs::read_to_string(&path) {
                if let Ok(s) = serde_json::from_str::<Settings>(&data) {
                    return s;
                }
            }
        }
        Self::default()
    }
    pub fn save(&self) {
        if let Some(dir) = Self::path().parent() { let _ = std::fs::create_dir_all(dir); }
        if let Ok(json) = serde_json::to_string_pretty(self) { let _ = std::fs::write(Self::path(), json); }
    }
    fn path() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("poebench-wizard").join("settings.json")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKey { GamePath, Patches, Font, Extras, Execute }

impl StepKey {
    pub fn title(self) -> &'static str {
        match self {
            StepKey::GamePath => "Game location",
            StepKey::Patches  => "Patches",
            StepKey::Font     => "Font",
            StepKey::Extras   => "More features",
            StepKey::Execute  => "Execute",
        }
    }
}

pub fn step_list(extras_unlocked: bool) -> Vec<StepKey> {
    let mut steps = vec![StepKey::GamePath, StepKey::Patches, StepKey::Font];
    if extras_unlocked {
        steps.push(StepKey::Extras);
    }
    steps.push(StepKey::Execute);
    steps
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameVersion { PoE1, PoE2 }

impl GameVersion {
    pub const ALL: [GameVersion; 2] = [GameVersion::PoE1, GameVersion::PoE2];
    pub fn flag(self) -> u32 {
        match self { GameVersion::PoE1 => 1, GameVersion::PoE2 => 2 }
    }
    pub fn label(self) -> &'static str {
        match self { GameVersion::PoE1 => "Path of Exile", GameVersion::PoE2 => "Path of Exile 2" }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GamePlatform { Tencent, Ggg, Steam, Epic }

impl GamePlatform {
    pub const ALL: [GamePlatform; 4] = [
        GamePlatform::Tencent, GamePlatform::Ggg, GamePlatform::Steam, GamePlatform::Epic,
    ];
    pub fn flag(self) -> &'static str {
        match self {
            GamePlatform::Tencent => "TENCENT",
            GamePlatform::Ggg     => "GGG",
            GamePlatform::Steam   => "Steam",
            GamePlatform::Epic    => "Epic",
        }
    }
    pub fn label(self) -> &'static str {
        match self {
            GamePlatform::Tencent => "Tencent",
            GamePlatform::Ggg     => "International",
            GamePlatform::Steam   => "Steam",
            GamePlatform::Epic    => "Epic",
        }
    }
    pub fn auto_detectable(self) -> bool {
        matches!(self, GamePlatform::Tencent | GamePlatform::Ggg)
    }
}

fn detect_install_path(version: GameVersion, platform: GamePlatform) -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let out = bench_command()
            .arg("get-game-install-path")
            .arg("--version").arg(version.flag().to_string())
            .arg("--platform").arg(platform.flag())
            .output();
        let path = match out {
            Ok(o) => String::from_utf8_lossy(&o.stdout).trim().to_string(),
            Err(e) => {
                log::warn!("get-game-install-path failed: {e}");
                String::new()
            }
        };
        let _ = tx.send(path);
    });
    rx
}

fn fetch_installed_fonts() -> Receiver<Vec<String>> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let out = bench_command().arg("get-installed-fonts").output();
        let fonts = match out {
            Ok(o) => {
                let stdout = String::from_utf8_lossy(&o.stdout);
                serde_json::from_str::<Vec<String>>(stdout.trim()).unwrap_or_default()
            }
            Err(e) => {
                log::warn!("get-installed-fonts failed: {e}");
                Vec::new()
            }
        };
        let _ = tx.send(fonts);
    });
    rx
}

fn pick_game_file() -> Receiver<Option<PathBuf>> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let picked = rfd::FileDialog::new()
            .set_title("Select Content.ggpk or _.index.bin")
            .add_filter("Content.ggpk/_.index.bin", &["ggpk", "bin"])
            .pick_file();
        let _ = tx.send(picked);
    });
    rx
}

fn pick_patch_files() -> Receiver<Vec<PathBuf>> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let picked = rfd::FileDialog::new()
            .set_title("Select patch archives")
            .add_filter("Patch archive", &["zip"])
            .pick_files()
            .unwrap_or_default();
        let _ = tx.send(picked);
    });
    rx
}

pub enum RunEvent {
    Line(String),
    Finished(i32),
}

fn stream_lines(reader: impl std::io::Read + Send + 'static, tx: Sender<RunEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            if tx.send(RunEvent::Line(line)).is_err() { break; }
        }
    })
}

fn spawn_patch_run(params: &ExecParams) -> Receiver<RunEvent> {
    let (tx, rx) = unbounded();
    let program = bench_exe();
    let args = patch_args(params);
    let _ = tx.send(RunEvent::Line(render_command(&program, &args)));
    run_streaming(program, args, tx);
    rx
}

fn run_streaming(program: PathBuf, args: Vec<String>, tx: Sender<RunEvent>) {
    thread::spawn(move || {
        let mut cmd = Command::new(&program);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
        let spawned = cmd
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(RunEvent::Line(format!("Failed to start subprocess: {e}")));
                let _ = tx.send(RunEvent::Finished(-1));
                return;
            }
        };
        let out = child.stdout.take().map(|s| stream_lines(s, tx.clone()));
        let err = child.stderr.take().map(|s| stream_lines(s, tx.clone()));
        if let Some(h) = out { let _ = h.join(); }
        if let Some(h) = err { let _ = h.join(); }
        let code = match child.wait() {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                let _ = tx.send(RunEvent::Line(format!("Failed to wait for subprocess: {e}")));
                -1
            }
        };
        let _ = tx.send(RunEvent::Finished(code));
    });
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind { Info, Success, Error }

struct Toast {
    kind: ToastKind,
    text: String,
    born: Instant,
}

enum ListEdit { Up(usize), Down(usize), Remove(usize) }

pub struct BenchWizard {
    settings:           Settings,
    current_step:       usize,
    unlock_clicks:      u32,

    game_path:          String,
    detect_version:     Option<GameVersion>,
    detect_platform:    Option<GamePlatform>,
    detect_rx:          Option<Receiver<String>>,
    game_pick_rx:       Option<Receiver<Option<PathBuf>>>,

    patches:            Vec<String>,
    patch_pick_rx:      Option<Receiver<Vec<PathBuf>>>,
    drag_region:        DragRegion,
    drag_hovering:      bool,

    fonts:              Vec<String>,
    font_rx:            Option<Receiver<Vec<String>>>,
    font_keyword:       String,
    font_choice:        String,
    font_size_delta:    i32,

    remove_fog:         Toggle<bool>,
    minimap_visibility: Toggle<bool>,
    camera_zoom:        Toggle<f32>,
    light_up:           Toggle<f32>,

    confirm_open:       bool,
    run_rx:             Option<Receiver<RunEvent>>,
    running_params:     Option<ExecParams>,
    run_log:            Vec<String>,

    toasts:             Vec<Toast>,
    cjk_font_loaded:    bool,
}

impl BenchWizard {
    pub fn new(cc: &eframe::CreationContext) -> Self {
        let mut fonts = egui::FontDefinitions::default();
        let mut cjk_loaded = false;
        for (idx, font_path) in find_cjk_fonts().into_iter().enumerate() {
            if let Ok(bytes) = std::fs::read(&font_path) {
                let key = format!("CjkFont{idx}");
                if idx == 0 { cjk_loaded = true; }
                fonts.font_data.insert(key.clone(), egui::FontData::from_owned(bytes));
                fonts.families.entry(FontFamily::Proportional).or_default().push(key.clone());
                fonts.families.entry(FontFamily::Monospace).or_default().push(key);
            }
        }
        cc.egui_ctx.set_fonts(fonts);

        let mut style = (*cc.egui_ctx.style()).clone();
        style.visuals.window_rounding                 = Rounding::same(10.0);
        style.visuals.widgets.noninteractive.rounding = Rounding::same(6.0);
        style.visuals.widgets.inactive.rounding       = Rounding::same(6.0);
        style.visuals.widgets.hovered.rounding        = Rounding::same(6.0);
        style.visuals.widgets.active.rounding         = Rounding::same(6.0);
        cc.egui_ctx.set_style(style);

        let settings = Settings::load();
        let game_path = if is_game_archive_path(&settings.last_params.path) {
            settings.last_params.path.trim().to_string()
        } else {
            String::new()
        };
        let font_choice = settings.last_params.font.clone().unwrap_or_default();

        Self {
            current_step: 0,
            unlock_clicks: 0,
            game_path,
            detect_version: None,
            detect_platform: None,
            detect_rx: None,
            game_pick_rx: None,
            patches: Vec::new(),
            patch_pick_rx: None,
            drag_region: DragRegion::default(),
            drag_hovering: false,
            fonts: Vec::new(),
            font_rx: Some(fetch_installed_fonts()),
            font_keyword: String::new(),
            font_choice,
            font_size_delta: 0,
            remove_fog: Toggle::new(true),
            minimap_visibility: Toggle::new(true),
            camera_zoom: Toggle::new(1.5),
            light_up: Toggle::new(0.5),
            confirm_open: false,
            run_rx: None,
            running_params: None,
            run_log: Vec::new(),
            toasts: Vec::new(),
            cjk_font_loaded: cjk_loaded,
            settings,
        }
    }

    fn busy(&self) -> bool {
        self.run_rx.is_some()
    }

    fn assembled_params(&self) -> ExecParams {
        ExecParams {
            path: self.game_path.trim().to_string(),
            patch: self.patches.clone(),
            font: effective_font(&self.patches, &self.font_choice),
            font_size_delta: self.font_size_delta,
            remove_fog: self.remove_fog.emit(),
            minimap_visibility: self.minimap_visibility.emit(),
            camera_zoom: self.camera_zoom.emit(),
            light_up: self.light_up.emit(),
        }
    }

    fn push_toast(&mut self, kind: ToastKind, text: impl Into<String>) {
        self.toasts.retain(|t| t.kind != kind);
        self.toasts.push(Toast { kind, text: text.into(), born: Instant::now() });
    }

    fn set_path(&mut self, path: String) {
        if is_game_archive_path(&path) {
            self.game_path = path.trim().to_string();
        } else if !path.trim().is_empty() {
            log::info!("ignoring path without a recognized extension: {path}");
        }
    }

    fn add_patch_paths(&mut self, incoming: Vec<String>) {
        if add_patches(&mut self.patches, incoming) {
            self.push_toast(ToastKind::Error, format!("At most {PATCH_LIMIT} patches can be added at once"));
        }
    }

    fn on_secret_click(&mut self) {
        if self.settings.extras_unlocked { return; }
        self.unlock_clicks += 1;
        if self.unlock_clicks >= UNLOCK_CLICKS {
            self.settings.extras_unlocked = true;
            self.settings.save();
            self.push_toast(ToastKind::Success, "More features unlocked!");
        } else if self.unlock_clicks >= UNLOCK_HINT_FROM {
            let left = UNLOCK_CLICKS - self.unlock_clicks;
            self.push_toast(ToastKind::Info, format!("{left} more clicks to unlock more features!"));
        }
    }

    fn on_next(&mut self) {
        let steps = step_list(self.settings.extras_unlocked);
        let last = steps.len() - 1;
        if self.current_step < last {
            if self.current_step == 0 && self.game_path.trim().is_empty() {
                self.push_toast(ToastKind::Error, "Select the game archive first");
                return;
            }
            self.current_step += 1;
        } else {
            self.request_execute();
        }
    }

    fn request_execute(&mut self) {
        let params = self.assembled_params();
        if params.path.is_empty() {
            self.push_toast(ToastKind::Error, "Select the game archive first");
            return;
        }
        if !params.has_actionable() {
            self.push_toast(ToastKind::Error, "Nothing is configured to execute");
            return;
        }
        self.confirm_open = true;
    }

    fn start_run(&mut self) {
        let submitted = self.assembled_params();
        let mut params = submitted.clone();
        self.run_log.clear();
        let mut notes = Vec::new();
        drop_stale_function_patch(&mut params, &mut notes);
        self.run_log.extend(notes);
        log::info!("executing patch run for {}", params.path);
        self.running_params = Some(submitted);
        self.run_rx = Some(spawn_patch_run(&params));
    }

    fn finish_run(&mut self, code: i32) {
        if code == 0 {
            self.push_toast(ToastKind::Success, "Execution finished successfully");
        } else {
            self.push_toast(ToastKind::Error, format!("Execution failed (exit code {code})"));
        }
        if let Some(params) = self.running_params.take() {
            self.settings.last_params = params;
        }
        self.settings.saved_at = Local::now();
        self.settings.save();
        log::info!("patch run finished with code {code}");
    }

    fn poll_workers(&mut self) {
        if let Some(rx) = &self.detect_rx {
            if let Ok(path) = rx.try_recv() {
                self.detect_rx = None;
                if !path.is_empty() {
                    self.set_path(path);
                }
            }
        }
        if let Some(rx) = &self.game_pick_rx {
            if let Ok(picked) = rx.try_recv() {
                self.game_pick_rx = None;
                if let Some(p) = picked {
                    self.set_path(p.display().to_string());
                }
            }
        }
        if let Some(rx) = &self.patch_pick_rx {
            if let Ok(picked) = rx.try_recv() {
                self.patch_pick_rx = None;
                if !picked.is_empty() {
                    let paths = picked.iter().map(|p| p.display().to_string()).collect();
                    self.add_patch_paths(paths);
                }
            }
        }
        if let Some(rx) = &self.font_rx {
            if let Ok(mut fonts) = rx.try_recv() {
                self.font_rx = None;
                if !fonts.is_empty() {
                    sort_fonts(&mut fonts);
                    self.fonts = fonts;
                }
            }
        }

        let mut finished = None;
        if let Some(rx) = &self.run_rx {
            while let Ok(ev) = rx.try_recv() {
                match ev {
                    RunEvent::Line(line) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            self.run_log.push(line.to_string());
                        }
                    }
                    RunEvent::Finished(code) => finished = Some(code),
                }
            }
        }
        if let Some(code) = finished {
            self.run_rx = None;
            self.finish_run(code);
        }
    }

    fn handle_dropped_patches(&mut self, ctx: &Context) {
        let hovering = ctx.input(|i| !i.raw.hovered_files.is_empty());
        if hovering && !self.drag_hovering { self.drag_region.enter(); }
        if !hovering && self.drag_hovering { self.drag_region.leave(); }
        self.drag_hovering = hovering;

        let dropped: Vec<String> = ctx.input(|i| {
            i.raw.dropped_files.iter()
                .filter_map(|f| f.path.as_ref())
                .map(|p| p.display().to_string())
                .collect()
        });
        if !dropped.is_empty() {
            self.drag_region.reset();
            self.drag_hovering = false;
            let zips: Vec<String> = dropped.into_iter()
                .filter(|p| p.to_lowercase().ends_with(".zip"))
                .collect();
            if !zips.is_empty() {
                self.add_patch_paths(zips);
            }
        }
    }

    fn draw_header(&mut self, ui: &mut Ui) {
        ui.horizontal(|ui| {
            ui.label(RichText::new("PoeBench Wizard").strong().size(14.0).color(Color32::from_rgb(150, 180, 250)));
            ui.label(RichText::new(APP_VERSION).size(10.0).color(Color32::from_gray(140)));
            if self.cjk_font_loaded {
                ui.label(RichText::new("CJK").size(10.0).color(Color32::from_rgb(80, 170, 80)));
            }
        });
        ui.add_space(4.0);

        let steps = step_list(self.settings.extras_unlocked);
        self.current_step = self.current_step.min(steps.len() - 1);
        let busy = self.busy();
        let path_set = !self.game_path.trim().is_empty();
        let mut clicked_step = None;
        ui.horizontal(|ui| {
            for (idx, step) in steps.iter().enumerate() {
                if idx > 0 {
                    ui.label(RichText::new("›").color(Color32::from_gray(90)));
                }
                let reachable = !busy && (idx == 0 || path_set);
                let text = format!("{}. {}", idx + 1, step.title());
                let text = if idx == self.current_step {
                    RichText::new(text).strong().size(13.0).color(Color32::from_rgb(150, 180, 250))
                } else {
                    RichText::new(text).size(13.0).color(Color32::from_gray(150))
                };
                let resp = ui.add_enabled(reachable, egui::Label::new(text).sense(Sense::click()));
                if resp.clicked() {
                    clicked_step = Some(idx);
                }
            }
        });
        if let Some(idx) = clicked_step {
            self.current_step = idx;
        }
        ui.add_space(4.0);
        ui.separator();
    }

    fn draw_path_step(&mut self, ui: &mut Ui) {
        ui.add_space(8.0);
        ui.horizontal(|ui| {
            let mut shown = self.game_path.clone();
            ui.add_enabled(
                false,
                egui::TextEdit::singleline(&mut shown)
                    .desired_width(ui.available_width() - 110.0)
                    .hint_text("Select Content.ggpk or Bundles2\\_.index.bin in the game folder"),
            );
            if ui.button("Browse...").clicked() && self.game_pick_rx.is_none() {
                self.game_pick_rx = Some(pick_game_file());
            }
        });

        ui.add_space(12.0);
        ui.label(RichText::new("Auto-detect the install location:").size(12.0).color(Color32::from_gray(170)));
        ui.add_space(4.0);
        ui.horizontal(|ui| {
            for version in GameVersion::ALL {
                let selected = self.detect_version == Some(version);
                if ui.selectable_label(selected, version.label()).clicked() {
                    self.detect_version = Some(version);
                    self.try_detect();
                }
            }
            ui.separator();
            for platform in GamePlatform::ALL {
                let selected = self.detect_platform == Some(platform);
                let resp = ui.selectable_label(selected && platform.auto_detectable(), platform.label());
                if resp.clicked() {
                    if platform.auto_detectable() {
                        self.detect_platform = Some(platform);
                        self.try_detect();
                    } else {
                        self.push_toast(
                            ToastKind::Info,
                            format!("Auto-detection is not available for {} installs yet, pick the file manually", platform.label()),
                        );
                    }
                }
            }
        });
        if self.detect_rx.is_some() {
            ui.add_space(6.0);
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(RichText::new("Looking for the game install...").size(12.0).color(Color32::from_gray(160)));
            });
        }
    }

    fn try_detect(&mut self) {
        if self.detect_rx.is_some() { return; }
        if let (Some(version), Some(platform)) = (self.detect_version, self.detect_platform) {
            self.detect_rx = Some(detect_install_path(version, platform));
        }
    }

    fn draw_patch_step(&mut self, ui: &mut Ui, ctx: &Context) {
        self.handle_dropped_patches(ctx);
        ui.add_space(8.0);

        let active = self.drag_region.is_active();
        let (rect, resp) = ui.allocate_exact_size(vec2(ui.available_width(), 120.0), Sense::click());
        let painter = ui.painter_at(rect);
        let fill = if active {
            Color32::from_rgba_unmultiplied(26, 40, 70, 220)
        } else {
            Color32::from_rgba_unmultiplied(22, 26, 38, 200)
        };
        let stroke = if active {
            Stroke::new(1.5, Color32::from_rgb(110, 160, 240))
        } else {
            Stroke::new(1.0, Color32::from_rgba_unmultiplied(90, 110, 160, 140))
        };
        painter.rect_filled(rect, 8.0, fill);
        painter.rect_stroke(rect, 8.0, stroke);
        painter.text(
            rect.center() - vec2(0.0, 20.0), Align2::CENTER_CENTER,
            "Click, or drop archives here, to add patches",
            FontId::proportional(14.0), Color32::from_gray(215),
        );
        painter.text(
            rect.center() + vec2(0.0, 4.0), Align2::CENTER_CENTER,
            "One or more patches can be installed in a single run",
            FontId::proportional(11.0), Color32::from_gray(150),
        );
        painter.text(
            rect.center() + vec2(0.0, 20.0), Align2::CENTER_CENTER,
            "A function patch should usually sit first in the install order",
            FontId::proportional(11.0), Color32::from_gray(150),
        );
        if resp.clicked() && self.patch_pick_rx.is_none() {
            self.patch_pick_rx = Some(pick_patch_files());
        }

        ui.add_space(10.0);
        ui.label(RichText::new("Patches to install").size(12.0).color(Color32::from_gray(170)));
        ui.add_space(4.0);
        if self.patches.is_empty() {
            ui.label(RichText::new("No patches added yet").size(12.0).color(Color32::from_gray(110)));
            return;
        }

        let mut edit = None;
        let count = self.patches.len();
        egui::ScrollArea::vertical().auto_shrink([false, true]).max_height(160.0).show(ui, |ui| {
            for (idx, path) in self.patches.iter().enumerate() {
                egui::Frame::none()
                    .fill(Color32::from_rgba_unmultiplied(24, 30, 46, 200))
                    .rounding(6.0)
                    .inner_margin(Margin::symmetric(8.0, 4.0))
                    .show(ui, |ui| {
                        ui.horizontal(|ui| {
                            if ui.add_enabled(idx > 0, egui::Button::new("▲").small()).clicked() {
                                edit = Some(ListEdit::Up(idx));
                            }
                            if ui.add_enabled(idx + 1 < count, egui::Button::new("▼").small()).clicked() {
                                edit = Some(ListEdit::Down(idx));
                            }
                            let label = format!("{}. {}", idx + 1, file_name(path));
                            ui.label(RichText::new(label).size(12.0)).on_hover_text(path);
                            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                                if ui.small_button("✕").clicked() {
                                    edit = Some(ListEdit::Remove(idx));
                                }
                            });
                        });
                    });
                ui.add_space(3.0);
            }
        });
        match edit {
            Some(ListEdit::Up(idx))     => self.patches.swap(idx, idx - 1),
            Some(ListEdit::Down(idx))   => self.patches.swap(idx, idx + 1),
            Some(ListEdit::Remove(idx)) => { self.patches.remove(idx); }
            None => {}
        }
    }

    fn draw_font_step(&mut self, ui: &mut Ui) {
        ui.add_space(8.0);
        let conversion_patch = has_script_conversion_patch(&self.patches);
        if conversion_patch && !self.font_choice.is_empty() {
            self.font_choice.clear();
        }

        ui.horizontal(|ui| {
            ui.add(
                egui::TextEdit::singleline(&mut self.font_keyword)
                    .desired_width(220.0)
                    .hint_text("Search fonts by name"),
            );
            if ui.button("Refresh list").clicked() && self.font_rx.is_none() {
                self.font_rx = Some(fetch_installed_fonts());
            }
            if self.font_rx.is_some() {
                ui.spinner();
            }
        });
        ui.add_space(6.0);

        if conversion_patch {
            ui.colored_label(
                Color32::from_rgb(230, 90, 90),
                "The patch list contains a script-conversion patch, so the font cannot be changed.",
            );
            ui.label(RichText::new(
                "Script conversion works by swapping the font itself; to pick a font, use a \
                 simplified or traditional patch instead.",
            ).size(11.0).color(Color32::from_gray(150)));
            ui.add_space(4.0);
        }

        let visible: Vec<String> = self.fonts.iter()
            .filter(|f| font_matches(f, &self.font_keyword))
            .cloned()
            .collect();
        ui.add_enabled_ui(!conversion_patch, |ui| {
            egui::ScrollArea::vertical().auto_shrink([false, true]).max_height(190.0).show(ui, |ui| {
                ui.radio_value(&mut self.font_choice, String::new(), "Keep the original font");
                for font in &visible {
                    ui.radio_value(&mut self.font_choice, font.clone(), font);
                }
            });
        });
        if self.fonts.is_empty() && self.font_rx.is_none() {
            ui.horizontal(|ui| {
                ui.label(RichText::new("Font list empty?").size(11.0).color(Color32::from_gray(150)));
                if ui.link(RichText::new("Install .NET 8 and restart the tool").size(11.0)).clicked() {
                    let _ = open::that(DOTNET8_URL);
                }
            });
        }

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            ui.label("Font size adjustment:");
            ui.add(egui::DragValue::new(&mut self.font_size_delta).clamp_range(-10..=10));
        });
        egui::CollapsingHeader::new("Notes").show(ui, |ui| {
            ui.label("Only fonts installed on this machine are listed; refresh after installing a new one.");
            ui.label("The size adjustment is added to the game's own font size, it does not replace it.");
        });
    }

    fn draw_extras_step(&mut self, ui: &mut Ui) {
        ui.add_space(8.0);
        egui::Frame::none()
            .fill(Color32::from_rgba_unmultiplied(58, 42, 16, 200))
            .rounding(6.0)
            .inner_margin(Margin::symmetric(10.0, 6.0))
            .show(ui, |ui| {
                ui.label(RichText::new(
                    "Please do not spread the way these features are unlocked; they are contentious \
                     enough to put the whole tool at risk.",
                ).size(11.0).color(Color32::from_rgb(235, 200, 130)));
            });
        ui.add_space(4.0);
        egui::Frame::none()
            .fill(Color32::from_rgba_unmultiplied(60, 22, 22, 200))
            .rounding(6.0)
            .inner_margin(Margin::symmetric(10.0, 6.0))
            .show(ui, |ui| {
                ui.label(RichText::new(
                    "Enable these with care: they can get an account banned, at your own risk. \
                     Leave a switch on \"Leave unmodified\" to keep that setting untouched.",
                ).size(11.0).color(Color32::from_rgb(240, 150, 150)));
            });
        ui.add_space(10.0);

        draw_bool_feature(ui, "Remove fog of war", &mut self.remove_fog);
        draw_bool_feature(ui, "Full minimap visibility", &mut self.minimap_visibility);
        draw_slider_feature(ui, "Camera zoom factor", &mut self.camera_zoom, 1.0..=3.0, false);
        draw_slider_feature(ui, "Ambient light boost", &mut self.light_up, 0.0..=3.0, true);
    }

    fn draw_execute_step(&mut self, ui: &mut Ui) {
        ui.add_space(8.0);
        egui::Frame::none()
            .fill(Color32::from_rgba_unmultiplied(22, 26, 38, 200))
            .rounding(6.0)
            .inner_margin(Margin::symmetric(10.0, 8.0))
            .show(ui, |ui| {
                ui.label(RichText::new("Disclaimer").strong().size(12.0));
                ui.horizontal_wrapped(|ui| {
                    ui.label(RichText::new("1. This tool is free and open source:").size(11.0).color(Color32::from_gray(170)));
                    if ui.link(RichText::new("project page").size(11.0)).clicked() {
                        let _ = open::that(PROJECT_URL);
                    }
                });
                ui.label(RichText::new("2. Any modification of the game files can lead to a ban; the consequences are yours to carry.").size(11.0).color(Color32::from_gray(170)));
                ui.label(RichText::new("3. The tool contains nothing malicious; read the source and build it yourself if in doubt.").size(11.0).color(Color32::from_gray(170)));
                ui.label(RichText::new("4. Patches and font changes are undone by every game update and must be reapplied with fresh patches.").size(11.0).color(Color32::from_gray(170)));
                ui.label(RichText::new("5. Continuing to use the tool means you agree with the above.").size(11.0).color(Color32::from_gray(170)));
            });

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            ui.label(RichText::new("Run log").size(12.0).color(Color32::from_gray(170)));
            if self.busy() {
                ui.spinner();
                ui.label(RichText::new("Running... wait for it to finish before closing the tool").size(11.0).color(Color32::from_gray(150)));
            }
        });
        ui.add_space(4.0);
        egui::Frame::none()
            .fill(Color32::from_rgba_unmultiplied(12, 14, 20, 230))
            .rounding(6.0)
            .inner_margin(Margin::symmetric(8.0, 6.0))
            .show(ui, |ui| {
                egui::ScrollArea::vertical()
                    .auto_shrink([false, false])
                    .stick_to_bottom(true)
                    .max_height(ui.available_height())
                    .show(ui, |ui| {
                        for line in &self.run_log {
                            ui.label(RichText::new(line).monospace().size(11.0).color(Color32::from_gray(200)));
                        }
                        if self.run_log.is_empty() {
                            ui.label(RichText::new("Output will show up here once a run starts.").size(11.0).color(Color32::from_gray(110)));
                        }
                    });
            });
    }

    fn draw_footer(&mut self, ui: &mut Ui) {
        let steps = step_list(self.settings.extras_unlocked);
        let last = steps.len() - 1;
        let busy = self.busy();
        let mut prev = false;
        let mut skip = false;
        let mut next = false;
        let mut secret = false;

        ui.horizontal(|ui| {
            if ui.add_enabled(!busy && self.current_step > 0, egui::Button::new("Previous")).clicked() {
                prev = true;
            }
            if self.current_step > 0 && self.current_step < last {
                if ui.add_enabled(!busy, egui::Button::new("Skip")).clicked() {
                    skip = true;
                }
            } else {
                let resp = ui.add(
                    egui::Label::new(
                        RichText::new("Always believe that something wonderful is about to happen")
                            .size(11.0)
                            .color(Color32::from_gray(100)),
                    )
                    .sense(Sense::click()),
                );
                if resp.clicked() {
                    secret = true;
                }
            }
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                let label = if self.current_step == last { "Execute" } else { "Next" };
                if ui.add_enabled(!busy, egui::Button::new(label)).clicked() {
                    next = true;
                }
            });
        });

        if prev { self.current_step -= 1; }
        if skip { self.current_step += 1; }
        if secret { self.on_secret_click(); }
        if next { self.on_next(); }
    }

    fn draw_confirm_modal(&mut self, ctx: &Context) -> bool {
        if !self.confirm_open { return false; }
        let mut proceed = false;
        let mut cancel = false;
        egui::Window::new("Confirm execution")
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label(RichText::new("Before you continue").strong().size(16.0));
                ui.add_space(6.0);
                ui.label("1. Make sure the game client, and anything else reading the game files, is closed.");
                ui.label("2. Wait for the run to finish. Closing this tool early can corrupt the game client.");
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("Continue").clicked() { proceed = true; }
                    if ui.button("Cancel").clicked() { cancel = true; }
                });
            });
        if proceed {
            self.confirm_open = false;
            self.start_run();
        }
        if cancel {
            self.confirm_open = false;
        }
        true
    }

    fn draw_toasts(&mut self, ctx: &Context) {
        self.toasts.retain(|t| t.born.elapsed() < TOAST_TTL);
        if self.toasts.is_empty() { return; }
        egui::Area::new(Id::new("wizard-toasts"))
            .anchor(Align2::CENTER_TOP, vec2(0.0, 10.0))
            .order(Order::Foreground)
            .show(ctx, |ui| {
                for toast in &self.toasts {
                    let (fill, stroke) = match toast.kind {
                        ToastKind::Info    => (Color32::from_rgba_unmultiplied(24, 34, 58, 240), Color32::from_rgb(90, 130, 210)),
                        ToastKind::Success => (Color32::from_rgba_unmultiplied(18, 46, 28, 240), Color32::from_rgb(80, 180, 110)),
                        ToastKind::Error   => (Color32::from_rgba_unmultiplied(56, 20, 20, 240), Color32::from_rgb(220, 90, 90)),
                    };
                    egui::Frame::none()
                        .fill(fill)
                        .rounding(Rounding::same(6.0))
                        .stroke(Stroke::new(1.0, stroke))
                        .inner_margin(Margin::symmetric(12.0, 6.0))
                        .show(ui, |ui| {
                            ui.label(RichText::new(&toast.text).size(13.0).color(Color32::from_gray(230)));
                        });
                    ui.add_space(4.0);
                }
            });
    }
}

fn draw_bool_feature(ui: &mut Ui, label: &str, toggle: &mut Toggle<bool>) {
    ui.horizontal(|ui| {
        ui.label(RichText::new(label).size(13.0));
        let switch = if toggle.enabled { "Ignore the risk" } else { "Leave unmodified" };
        ui.toggle_value(&mut toggle.enabled, switch);
        if toggle.enabled {
            ui.radio_value(&mut toggle.value, true, "Enable");
            ui.radio_value(&mut toggle.value, false, "Disable");
        }
    });
    ui.add_space(6.0);
}

fn draw_slider_feature(
    ui: &mut Ui,
    label: &str,
    toggle: &mut Toggle<f32>,
    range: RangeInclusive<f32>,
    zero_is_unmodified: bool,
) {
    ui.horizontal(|ui| {
        ui.label(RichText::new(label).size(13.0));
        let switch = if toggle.enabled { "Ignore the risk" } else { "Leave unmodified" };
        ui.toggle_value(&mut toggle.enabled, switch);
        if toggle.enabled {
            ui.add(egui::Slider::new(&mut toggle.value, range).step_by(0.1));
            if zero_is_unmodified && toggle.value == 0.0 {
                ui.label(RichText::new("unmodified").size(11.0).color(Color32::from_gray(140)));
            } else {
                ui.label(format!("{:.1}×", toggle.value));
            }
        }
    });
    ui.add_space(6.0);
}

impl eframe::App for BenchWizard {
    fn update(&mut self, ctx: &Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(if self.busy() { Duration::from_millis(33) } else { Duration::from_millis(120) });

        self.poll_workers();

        if self.draw_confirm_modal(ctx) {
            self.draw_toasts(ctx);
            return;
        }

        let step = step_list(self.settings.extras_unlocked)
            .get(self.current_step)
            .copied()
            .unwrap_or(StepKey::GamePath);

        egui::TopBottomPanel::bottom("wizard-footer")
            .show_separator_line(true)
            .show(ctx, |ui| {
                ui.add_space(6.0);
                self.draw_footer(ui);
                ui.add_space(6.0);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.draw_header(ui);
            match step {
                StepKey::GamePath => self.draw_path_step(ui),
                StepKey::Patches  => self.draw_patch_step(ui, ctx),
                StepKey::Font     => self.draw_font_step(ui),
                StepKey::Extras   => self.draw_extras_step(ui),
                StepKey::Execute  => self.draw_execute_step(ui),
            }
        });

        self.draw_toasts(ctx);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("PoeBench Wizard")
            .with_inner_size([800.0, 500.0])
            .with_resizable(false),
        ..Default::default()
    };

    eframe::run_native("PoeBench Wizard", native_options, Box::new(|cc| Box::new(BenchWizard::new(cc))))
        .map_err(|e| anyhow::anyhow!("eframe: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_path() -> ExecParams {
        ExecParams { path: "C:\\Game\\Content.ggpk".into(), ..Default::default() }
    }

    #[test]
    fn recognizes_archive_and_index_paths() {
        assert!(is_game_archive_path("C:\\Game\\Content.ggpk"));
        assert!(is_game_archive_path("  C:\\Game\\CONTENT.GGPK  "));
        assert!(is_game_archive_path("/games/poe/Bundles2/_.index.bin"));
        assert!(!is_game_archive_path("C:\\Game\\Content.zip"));
        assert!(!is_game_archive_path("Content.ggpk.bak"));
        assert!(!is_game_archive_path(""));
        assert!(!is_game_archive_path("   "));
    }

    #[test]
    fn patch_list_stays_unique() {
        let mut list = vec!["a.zip".to_string()];
        let truncated = add_patches(&mut list, vec!["a.zip".to_string(), "b.zip".to_string()]);
        assert!(!truncated);
        assert_eq!(list, vec!["a.zip".to_string(), "b.zip".to_string()]);
    }

    #[test]
    fn patch_list_truncates_past_the_cap() {
        let mut list = Vec::new();
        let incoming: Vec<String> = (0..10).map(|i| format!("p{i}.zip")).collect();
        let truncated = add_patches(&mut list, incoming);
        assert!(truncated);
        assert_eq!(list.len(), PATCH_LIMIT);
        assert_eq!(list[0], "p0.zip");
        assert_eq!(list[7], "p7.zip");
    }

    #[test]
    fn patch_list_at_the_cap_is_not_an_error() {
        let mut list = Vec::new();
        let incoming: Vec<String> = (0..8).map(|i| format!("p{i}.zip")).collect();
        assert!(!add_patches(&mut list, incoming));
        assert_eq!(list.len(), PATCH_LIMIT);
    }

    #[test]
    fn disabled_toggle_emits_nothing() {
        let mut toggle = Toggle::new(true);
        toggle.enabled = true;
        assert_eq!(toggle.emit(), Some(true));
        toggle.enabled = false;
        assert_eq!(toggle.emit(), None);
    }

    #[test]
    fn script_conversion_patch_forces_font_off() {
        let patches = vec![format!("C:\\patches\\{}_3.25.zip", SCRIPT_CONVERSION_MARKER)];
        assert_eq!(effective_font(&patches, "SimSun"), None);
        assert_eq!(effective_font(&[], "SimSun"), Some("SimSun".to_string()));
        assert_eq!(effective_font(&[], ""), None);
    }

    #[test]
    fn empty_record_is_not_actionable() {
        let params = params_with_path();
        assert!(!params.has_actionable());
    }

    #[test]
    fn each_defined_field_makes_the_record_actionable() {
        let mut params = params_with_path();
        params.patch.push("p.zip".into());
        assert!(params.has_actionable());

        let mut params = params_with_path();
        params.font = Some("SimSun".into());
        assert!(params.has_actionable());

        let mut params = params_with_path();
        params.font_size_delta = -2;
        assert!(params.has_actionable());

        let mut params = params_with_path();
        params.remove_fog = Some(false);
        assert!(params.has_actionable());

        let mut params = params_with_path();
        params.camera_zoom = Some(1.5);
        assert!(params.has_actionable());
    }

    #[test]
    fn undefined_fields_contribute_no_flags() {
        let params = params_with_path();
        let args = patch_args(&params);
        assert_eq!(args, vec!["patch", "-p", "C:\\Game\\Content.ggpk"]);
    }

    #[test]
    fn defined_fields_render_one_flag_each() {
        let params = ExecParams {
            path: "C:\\Game\\Content.ggpk".into(),
            patch: vec!["a.zip".into(), "b.zip".into()],
            font: Some("SimSun".into()),
            font_size_delta: 2,
            remove_fog: Some(true),
            minimap_visibility: Some(false),
            camera_zoom: Some(1.5),
            light_up: Some(0.5),
        };
        let args = patch_args(&params);
        assert_eq!(args, vec![
            "patch", "-p", "C:\\Game\\Content.ggpk",
            "-pf", "a.zip", "-pf", "b.zip",
            "--font", "SimSun",
            "--font-size-delta", "2",
            "--remove-fog", "true",
            "--minimap-visibility", "false",
            "--camera-zoom", "1.5",
            "--light-up", "0.5",
        ]);
    }

    #[test]
    fn explicit_false_still_renders_its_flag() {
        let mut params = params_with_path();
        params.remove_fog = Some(false);
        let args = patch_args(&params);
        assert!(args.windows(2).any(|w| w == ["--remove-fog", "false"]));
    }

    #[test]
    fn version_is_pulled_out_of_the_companion_xml() {
        let xml = "<root>\n  <VersionData>\n    <Author>x</Author>\n    <Version>3.25.1.2</Version>\n  </VersionData>\n</root>";
        assert_eq!(client_version_from_xml(xml), Some("3.25.1.2".to_string()));
        let mixed_case = "<versiondata><version>1.2.3</version></versiondata>";
        assert_eq!(client_version_from_xml(mixed_case), Some("1.2.3".to_string()));
        assert_eq!(client_version_from_xml("<root></root>"), None);
        assert_eq!(client_version_from_xml(""), None);
    }

    fn game_dir_with_version(tag: &str, version: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("poebench-wizard-test-{}", std::process::id()))
            .join(tag);
        std::fs::create_dir_all(dir.join("TCLS")).unwrap();
        std::fs::write(
            dir.join("TCLS").join("mmog_data.xml"),
            format!("<root><VersionData><Version>{version}</Version></VersionData></root>"),
        )
        .unwrap();
        dir
    }

    #[test]
    fn matching_function_patch_is_kept() {
        let dir = game_dir_with_version("match", "1.2.3");
        let mut params = ExecParams {
            path: dir.join("Content.ggpk").display().to_string(),
            patch: vec![format!("C:\\patches\\{}_1.2.3.zip", FUNCTION_PATCH_MARKER)],
            ..Default::default()
        };
        let mut log = Vec::new();
        drop_stale_function_patch(&mut params, &mut log);
        assert_eq!(params.patch.len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn stale_function_patch_is_dropped_with_two_log_lines() {
        let dir = game_dir_with_version("stale", "1.2.4");
        let patch = format!("C:\\patches\\{}_1.2.3.zip", FUNCTION_PATCH_MARKER);
        let mut params = ExecParams {
            path: dir.join("Content.ggpk").display().to_string(),
            patch: vec![patch.clone(), "C:\\patches\\other.zip".to_string()],
            ..Default::default()
        };
        let mut log = Vec::new();
        drop_stale_function_patch(&mut params, &mut log);
        assert_eq!(params.patch, vec!["C:\\patches\\other.zip".to_string()]);
        assert_eq!(log.len(), 2);
        assert!(log[0].contains("1.2.4"));
        assert!(log[1].contains(file_name(&patch)));
    }

    #[test]
    fn missing_companion_xml_skips_the_check() {
        let dir = std::env::temp_dir()
            .join(format!("poebench-wizard-test-{}", std::process::id()))
            .join("missing-xml");
        std::fs::create_dir_all(&dir).unwrap();
        let patch = format!("C:\\patches\\{}_1.2.3.zip", FUNCTION_PATCH_MARKER);
        let mut params = ExecParams {
            path: dir.join("Content.ggpk").display().to_string(),
            patch: vec![patch.clone()],
            ..Default::default()
        };
        let mut log = Vec::new();
        drop_stale_function_patch(&mut params, &mut log);
        assert_eq!(params.patch, vec![patch]);
        assert!(log.is_empty());
    }

    #[test]
    fn index_targets_skip_the_version_check() {
        let dir = game_dir_with_version("index-target", "9.9.9");
        let patch = format!("C:\\patches\\{}_1.2.3.zip", FUNCTION_PATCH_MARKER);
        let mut params = ExecParams {
            path: dir.join("_.index.bin").display().to_string(),
            patch: vec![patch.clone()],
            ..Default::default()
        };
        let mut log = Vec::new();
        drop_stale_function_patch(&mut params, &mut log);
        assert_eq!(params.patch, vec![patch]);
        assert!(log.is_empty());
    }

    #[test]
    fn drag_region_counts_nested_targets() {
        let mut region = DragRegion::default();
        assert!(!region.is_active());
        region.enter();
        region.enter();
        assert!(region.is_active());
        region.leave();
        assert!(region.is_active());
        region.leave();
        assert!(!region.is_active());
        region.leave();
        assert!(!region.is_active());
        region.enter();
        region.reset();
        assert!(!region.is_active());
    }

    #[test]
    fn cjk_fonts_sort_first() {
        let mut fonts = vec![
            "arial".to_string(),
            "宋体".to_string(),
            "Comic Sans MS".to_string(),
            "黑体".to_string(),
        ];
        sort_fonts(&mut fonts);
        assert_eq!(fonts, vec![
            "宋体".to_string(),
            "黑体".to_string(),
            "arial".to_string(),
            "Comic Sans MS".to_string(),
        ]);
    }

    #[test]
    fn font_search_ignores_case() {
        assert!(font_matches("Comic Sans MS", "comic"));
        assert!(font_matches("Comic Sans MS", "SANS"));
        assert!(font_matches("Comic Sans MS", ""));
        assert!(!font_matches("Comic Sans MS", "serif"));
    }

    #[test]
    fn absent_optionals_stay_out_of_the_serialized_record() {
        let mut params = params_with_path();
        params.remove_fog = Some(true);
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("removeFog"));
        assert!(!json.contains("minimapVisibility"));
        assert!(!json.contains("cameraZoom"));
        assert!(!json.contains("lightUp"));
        assert!(!json.contains("\"font\""));

        let back: ExecParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn file_name_handles_both_separators() {
        assert_eq!(file_name("C:\\patches\\fix.zip"), "fix.zip");
        assert_eq!(file_name("/home/u/patches/fix.zip"), "fix.zip");
        assert_eq!(file_name("fix.zip"), "fix.zip");
    }

    #[cfg(unix)]
    #[test]
    fn both_output_streams_land_in_one_channel() {
        let (tx, rx) = unbounded();
        run_streaming(
            PathBuf::from("sh"),
            vec!["-c".to_string(), "echo out-line; echo err-line >&2".to_string()],
            tx,
        );
        let mut lines = Vec::new();
        let mut code = None;
        while code.is_none() {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                RunEvent::Line(l) => lines.push(l),
                RunEvent::Finished(c) => code = Some(c),
            }
        }
        assert_eq!(code, Some(0));
        assert!(lines.iter().any(|l| l == "out-line"));
        assert!(lines.iter().any(|l| l == "err-line"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_to_start_reports_the_sentinel_code() {
        let (tx, rx) = unbounded();
        run_streaming(PathBuf::from("/no/such/binary/anywhere"), Vec::new(), tx);
        let mut lines = Vec::new();
        let mut code = None;
        while code.is_none() {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                RunEvent::Line(l) => lines.push(l),
                RunEvent::Finished(c) => code = Some(c),
            }
        }
        assert_eq!(code, Some(-1));
        assert!(lines.iter().any(|l| l.starts_with("Failed to start subprocess")));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_codes_come_back_as_is() {
        let (tx, rx) = unbounded();
        run_streaming(
            PathBuf::from("sh"),
            vec!["-c".to_string(), "exit 3".to_string()],
            tx,
        );
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                RunEvent::Line(_) => {}
                RunEvent::Finished(c) => {
                    assert_eq!(c, 3);
                    break;
                }
            }
        }
    }

    #[test]
    fn extras_step_appears_only_after_unlock() {
        let locked = step_list(false);
        assert_eq!(locked, vec![StepKey::GamePath, StepKey::Patches, StepKey::Font, StepKey::Execute]);
        let unlocked = step_list(true);
        assert_eq!(unlocked, vec![
            StepKey::GamePath, StepKey::Patches, StepKey::Font, StepKey::Extras, StepKey::Execute,
        ]);
    }
}
