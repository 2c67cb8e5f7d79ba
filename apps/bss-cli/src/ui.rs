use std::{
    collections::{BTreeMap, VecDeque},
    sync::mpsc::{Receiver, Sender, TryRecvError},
    time::Duration,
};

use anyhow::Result;
use bss_session::OperatorCommand;
use bss_types::{
    camera::CameraId,
    detection::{ConfidenceBand, DetectionEvent, ObjectClass},
    events::{
        ConnectionEvent, DashboardEvent, DashboardPayload, LiveFrameSummary, Notice, NoticeLevel,
        TestCatalog, TestFrameSummary, TestSessionStatus,
    },
    session::{PlaybackAction, SessionMode, TargetMode, TestSelection, View},
};
use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, Event as CEvent, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Terminal,
};
use tokio::sync::{broadcast, mpsc};

const MAX_LOG_ENTRIES: usize = 120;
const MAX_NOTICES: usize = 5;
const RATES: [f64; 5] = [0.25, 0.5, 1.0, 1.5, 2.0];
const DEFAULT_RATE: usize = 2;

pub enum UiMessage {
    Event(DashboardEvent),
    Shutdown,
}

/// Relay the async dashboard bus into the blocking UI thread.
pub async fn forward_bus(mut bus: broadcast::Receiver<DashboardEvent>, ui: Sender<UiMessage>) {
    loop {
        match bus.recv().await {
            Ok(event) => {
                if ui.send(UiMessage::Event(event)).is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                let _ = ui.send(UiMessage::Shutdown);
                return;
            }
        }
    }
}

pub fn run(
    receiver: Receiver<UiMessage>,
    commands: mpsc::Sender<OperatorCommand>,
    selection: TestSelection,
    summary: String,
    api_base: String,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(
        &mut terminal,
        receiver,
        commands,
        &selection,
        summary.as_str(),
        api_base.as_str(),
    );

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    res
}

struct DashboardView {
    mode: SessionMode,
    view: View,
    connection: String,
    channels: BTreeMap<CameraId, LiveFrameSummary>,
    last_alarm: Option<(CameraId, DateTime<Utc>)>,
    detections: Vec<DetectionEvent>,
    notices: VecDeque<Notice>,
    test_status: String,
    test_frame: Option<TestFrameSummary>,
    catalog: TestCatalog,
    playing: bool,
    rate_index: usize,
    logs: VecDeque<String>,
}

impl DashboardView {
    fn new() -> Self {
        Self {
            mode: SessionMode::Idle,
            view: View::Root,
            connection: "연결 대기".into(),
            channels: BTreeMap::new(),
            last_alarm: None,
            detections: Vec::new(),
            notices: VecDeque::with_capacity(MAX_NOTICES),
            test_status: "대기 중".into(),
            test_frame: None,
            catalog: TestCatalog::default(),
            playing: false,
            rate_index: DEFAULT_RATE,
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
        }
    }

    fn apply(&mut self, event: DashboardEvent) {
        match &event.payload {
            DashboardPayload::Connection(connection) => {
                self.connection = match connection {
                    ConnectionEvent::Connected => "연결됨".into(),
                    ConnectionEvent::Disconnected => "연결 끊김".into(),
                    ConnectionEvent::ConnectError(reason) => format!("연결 실패: {reason}"),
                };
            }
            DashboardPayload::ModeChanged(mode) => {
                self.mode = *mode;
                if *mode != SessionMode::Live {
                    self.channels.clear();
                }
            }
            DashboardPayload::LiveFrame(frame) => {
                self.channels.insert(frame.camera_id, frame.clone());
                // Frames are too frequent for the log.
                return;
            }
            DashboardPayload::Alarm(camera) => self.last_alarm = Some((*camera, event.timestamp)),
            DashboardPayload::TestFrame(frame) => {
                self.test_frame = Some(frame.clone());
                return;
            }
            DashboardPayload::TestSession(status) => match status {
                TestSessionStatus::Started { model, .. } => {
                    self.test_status = format!("분석 중 ({model})");
                    self.playing = false;
                    self.rate_index = DEFAULT_RATE;
                }
                TestSessionStatus::Stopped => {
                    self.test_status = "중지됨".into();
                    self.test_frame = None;
                    self.playing = false;
                }
            },
            DashboardPayload::TestCatalog(catalog) => self.catalog = catalog.clone(),
            DashboardPayload::FeedUpdated(feed) => self.detections = feed.entries.clone(),
            DashboardPayload::Notice(notice) => {
                if self.notices.len() == MAX_NOTICES {
                    self.notices.pop_front();
                }
                self.notices.push_back(notice.clone());
            }
        }

        if self.logs.len() == MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(format_event(&event));
    }

    fn command_for(&mut self, key: KeyCode, selection: &TestSelection) -> Option<OperatorCommand> {
        let command = match key {
            KeyCode::Char('l') => OperatorCommand::SwitchMode(TargetMode::Live),
            KeyCode::Char('t') => OperatorCommand::SwitchMode(TargetMode::Test),
            KeyCode::Char('s') => OperatorCommand::StartTest(
                selection
                    .clone()
                    .with_defaults(&self.catalog.videos, &self.catalog.models),
            ),
            KeyCode::Char('x') => OperatorCommand::StopTest,
            KeyCode::Char(' ') => {
                self.playing = !self.playing;
                OperatorCommand::Playback(if self.playing {
                    PlaybackAction::Play
                } else {
                    PlaybackAction::Pause
                })
            }
            KeyCode::Char('+') => {
                self.rate_index = (self.rate_index + 1).min(RATES.len() - 1);
                OperatorCommand::Playback(PlaybackAction::SetRate(RATES[self.rate_index]))
            }
            KeyCode::Char('-') => {
                self.rate_index = self.rate_index.saturating_sub(1);
                OperatorCommand::Playback(PlaybackAction::SetRate(RATES[self.rate_index]))
            }
            KeyCode::Char('r') => OperatorCommand::RefreshEvents,
            KeyCode::Char('c') => OperatorCommand::Reconnect,
            KeyCode::Char('h') => {
                self.view = View::Root;
                OperatorCommand::Navigate(View::Root)
            }
            KeyCode::Char('a') => {
                self.view = View::Admin;
                OperatorCommand::Navigate(View::Admin)
            }
            _ => return None,
        };
        Some(command)
    }
}

fn run_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    receiver: Receiver<UiMessage>,
    commands: mpsc::Sender<OperatorCommand>,
    selection: &TestSelection,
    summary: &str,
    api_base: &str,
) -> Result<()> {
    let mut state = DashboardView::new();
    let mut should_close = false;

    loop {
        loop {
            match receiver.try_recv() {
                Ok(UiMessage::Event(event)) => state.apply(event),
                Ok(UiMessage::Shutdown) | Err(TryRecvError::Disconnected) => {
                    should_close = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        terminal.draw(|f| {
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints(
                    [
                        Constraint::Length(3),
                        Constraint::Min(8),
                        Constraint::Length(MAX_NOTICES as u16 + 2),
                        Constraint::Length(8),
                    ]
                    .as_ref(),
                )
                .split(f.size());
            let columns = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(45), Constraint::Percentage(55)].as_ref())
                .split(rows[1]);

            let header = Paragraph::new(Line::from(vec![
                Span::styled(
                    "BSS 상태",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw("  "),
                Span::raw(format!("{:?} / {:?}", state.mode, state.view)),
                Span::raw("  "),
                Span::raw(state.connection.clone()),
                Span::raw("  "),
                Span::styled("설정:", Style::default().fg(Color::Magenta)),
                Span::raw(" "),
                Span::raw(summary),
                Span::raw("  "),
                Span::styled("q", Style::default().fg(Color::Yellow)),
                Span::raw(" 를 눌러 종료"),
            ]))
            .block(Block::default().borders(Borders::ALL).title("요약"));
            f.render_widget(header, rows[0]);

            let mut lines: Vec<Line> = state
                .channels
                .values()
                .map(|channel| {
                    let style = if channel.person_detected {
                        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    };
                    Line::from(Span::styled(
                        format!(
                            "카메라 {}  RGB {}B  TIR {}B{}",
                            channel.camera_id,
                            channel.rgb_bytes,
                            channel.thermal_bytes,
                            if channel.person_detected { "  사람 감지" } else { "" }
                        ),
                        style,
                    ))
                })
                .collect();
            if let Some((camera, at)) = state.last_alarm {
                lines.push(Line::from(Span::styled(
                    format!("마지막 경보: 카메라 {camera} @ {}", at.format("%H:%M:%S")),
                    Style::default().fg(Color::Red),
                )));
            }
            lines.push(Line::from(format!("테스트: {}", state.test_status)));
            if let Some(frame) = &state.test_frame {
                lines.push(Line::from(format!(
                    "  {:.1}s / {:.1}s  x{}  RGB {}B  TIR {}B",
                    frame.playback.position,
                    frame.playback.duration,
                    RATES[state.rate_index],
                    frame.rgb_bytes,
                    frame.thermal_bytes
                )));
            }
            lines.push(Line::from(Span::styled(
                "l 실시간  t 테스트  s 시작  x 중지  space 재생  +/- 속도  r 새로고침  c 재연결  h/a 화면",
                Style::default().fg(Color::DarkGray),
            )));
            let channels = Paragraph::new(lines)
                .block(Block::default().borders(Borders::ALL).title("채널"));
            f.render_widget(channels, columns[0]);

            let detections: Vec<ListItem> = state
                .detections
                .iter()
                .enumerate()
                .map(|(index, event)| {
                    let mut lines = vec![Line::from(describe_detection(event))];
                    if index == 0 {
                        if let Some(url) = event.recording_url(api_base) {
                            lines.push(Line::from(format!("  녹화: {url}")));
                        }
                    }
                    ListItem::new(lines)
                        .style(Style::default().fg(band_color(event.confidence_band())))
                })
                .collect();
            let feed = List::new(detections)
                .block(Block::default().borders(Borders::ALL).title("탐지 이벤트"));
            f.render_widget(feed, columns[1]);

            let notices: Vec<ListItem> = state
                .notices
                .iter()
                .rev()
                .map(|notice| {
                    let color = match notice.level {
                        NoticeLevel::Info => Color::Gray,
                        NoticeLevel::Warning => Color::Yellow,
                        NoticeLevel::Error => Color::Red,
                    };
                    ListItem::new(notice.message.clone()).style(Style::default().fg(color))
                })
                .collect();
            let notices =
                List::new(notices).block(Block::default().borders(Borders::ALL).title("알림"));
            f.render_widget(notices, rows[2]);

            let items: Vec<ListItem> = state
                .logs
                .iter()
                .rev()
                .map(|entry| ListItem::new(entry.clone()))
                .collect();
            let list = List::new(items)
                .block(Block::default().borders(Borders::ALL).title("최근 이벤트"))
                .highlight_style(Style::default().fg(Color::Yellow));
            f.render_widget(list, rows[3]);
        })?;

        if should_close {
            break;
        }

        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    break;
                }
                if let Some(command) = state.command_for(key.code, selection) {
                    if commands.blocking_send(command).is_err() {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn class_label(class: ObjectClass) -> &'static str {
    match class {
        ObjectClass::Person => "사람",
        ObjectClass::WildBoar => "멧돼지",
        ObjectClass::WaterDeer => "고라니",
        ObjectClass::Other => "기타",
    }
}

fn band_color(band: ConfidenceBand) -> Color {
    match band {
        ConfidenceBand::Critical => Color::Red,
        ConfidenceBand::High => Color::LightRed,
        ConfidenceBand::Medium => Color::Yellow,
        ConfidenceBand::Low => Color::Gray,
    }
}

fn describe_detection(event: &DetectionEvent) -> String {
    let at = event
        .occurred_at()
        .map(|ts| ts.format("%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| event.timestamp.clone());
    let label = match event.object_class() {
        ObjectClass::Other => event.detected_object.clone(),
        class => class_label(class).to_string(),
    };
    format!(
        "{at}  {label} {:.0}%  {} / {}",
        event.confidence * 100.0,
        event.camera_name,
        event.location
    )
}

pub fn format_event(event: &DashboardEvent) -> String {
    let timestamp = event.timestamp.format("%H:%M:%S");
    match &event.payload {
        DashboardPayload::Connection(connection) => {
            format!("[{}] Connection {:?}", timestamp, connection)
        }
        DashboardPayload::ModeChanged(mode) => format!("[{}] Mode -> {:?}", timestamp, mode),
        DashboardPayload::LiveFrame(frame) => format!(
            "[{}] Camera {} frame rgb={}B tir={}B person={}",
            timestamp, frame.camera_id, frame.rgb_bytes, frame.thermal_bytes, frame.person_detected
        ),
        DashboardPayload::Alarm(camera) => {
            format!("[{}] Person detected on camera {}", timestamp, camera)
        }
        DashboardPayload::TestFrame(frame) => format!(
            "[{}] Test frame {:.1}s/{:.1}s rgb={}B tir={}B",
            timestamp,
            frame.playback.position,
            frame.playback.duration,
            frame.rgb_bytes,
            frame.thermal_bytes
        ),
        DashboardPayload::TestSession(TestSessionStatus::Started {
            rgb,
            thermal,
            model,
        }) => format!(
            "[{}] Test analysis started rgb={} tir={} model={}",
            timestamp, rgb, thermal, model
        ),
        DashboardPayload::TestSession(TestSessionStatus::Stopped) => {
            format!("[{}] Test analysis stopped", timestamp)
        }
        DashboardPayload::TestCatalog(catalog) => format!(
            "[{}] Test catalog videos={} models={}",
            timestamp,
            catalog.videos.len(),
            catalog.models.len()
        ),
        DashboardPayload::FeedUpdated(feed) => match feed.entries.first() {
            Some(newest) => format!(
                "[{}] Feed {} events, newest {}",
                timestamp,
                feed.len,
                describe_detection(newest)
            ),
            None => format!("[{}] Feed empty", timestamp),
        },
        DashboardPayload::Notice(notice) => {
            format!("[{}] {:?}: {}", timestamp, notice.level, notice.message)
        }
    }
}
