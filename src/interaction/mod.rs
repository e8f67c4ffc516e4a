// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 鼠标框选状态机 (Interaction State)
///
/// 状态流转:
/// ```text
/// Idle ──press──▶ Selecting ──release(拖拽足够)──▶ Initializing ──跟踪器创建──▶ Tracking
///   ▲                 │                                                        │
///   └──release(太小)──┘◀───────────────────── reset / 全部丢失 ◀──────────────┘
/// ```
use crate::geometry::BBox;

/// 交互模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 等待框选
    Idle,
    /// 正在拖拽
    Selecting,
    /// 已确认目标, 跟踪器尚未创建
    Initializing,
    /// 跟踪中
    Tracking,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Idle => "等待框选",
            Mode::Selecting => "框选中",
            Mode::Initializing => "初始化",
            Mode::Tracking => "跟踪中",
        }
    }
}

/// 框选状态 + 已确认的跟踪框
#[derive(Debug, Clone)]
pub struct InteractionState {
    mode: Mode,
    anchor: (i32, i32),  // 拖拽起点
    current: (i32, i32), // 拖拽当前点
    boxes: Vec<BBox>,
    drag_threshold: i32,
    generation: u64, // 每次目标集合变化 +1, 用于丢弃过期描述
}

impl InteractionState {
    pub fn new(drag_threshold: i32) -> Self {
        Self {
            mode: Mode::Idle,
            anchor: (-1, -1),
            current: (-1, -1),
            boxes: Vec::new(),
            drag_threshold,
            generation: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn boxes(&self) -> &[BBox] {
        &self.boxes
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 正在拖拽的矩形 (两个角点)
    pub fn drag_rect(&self) -> Option<((i32, i32), (i32, i32))> {
        (self.mode == Mode::Selecting).then_some((self.anchor, self.current))
    }

    /// 鼠标按下: 任意状态进入 Selecting (跟踪暂停)
    pub fn press(&mut self, x: i32, y: i32) {
        self.mode = Mode::Selecting;
        self.anchor = (x, y);
        self.current = (x, y);
    }

    /// 鼠标移动
    pub fn drag(&mut self, x: i32, y: i32) {
        if self.mode == Mode::Selecting {
            self.current = (x, y);
        }
    }

    /// 鼠标松开: 两个方向拖拽距离都超过阈值才生成跟踪框
    pub fn release(&mut self, x: i32, y: i32) -> Option<BBox> {
        if self.mode != Mode::Selecting {
            return None;
        }
        self.current = (x, y);

        let (x0, y0) = self.anchor;
        if (x - x0).abs() > self.drag_threshold && (y - y0).abs() > self.drag_threshold {
            let bbox = BBox::from_corners(x0, y0, x, y);
            self.boxes.push(bbox);
            self.generation += 1;
            self.mode = Mode::Initializing;
            log::info!("🎯 新目标 #{}: {:?}", self.boxes.len(), bbox);
            Some(bbox)
        } else {
            self.mode = Mode::Idle;
            None
        }
    }

    /// 直接添加目标 (无窗口模式的初始目标)
    pub fn add_box(&mut self, bbox: BBox) {
        self.boxes.push(bbox);
        self.generation += 1;
        self.mode = Mode::Initializing;
    }

    /// 清空全部目标回到 Idle; 正在进行的拖拽保留起点
    pub fn reset(&mut self) {
        if !self.boxes.is_empty() {
            self.generation += 1;
        }
        self.boxes.clear();
        if self.mode != Mode::Selecting {
            self.mode = Mode::Idle;
        }
    }

    /// 跟踪器已全部创建: Initializing → Tracking
    pub fn mark_tracking(&mut self) -> bool {
        if self.mode == Mode::Initializing && !self.boxes.is_empty() {
            self.mode = Mode::Tracking;
            true
        } else {
            false
        }
    }

    /// 跟踪器输出的新位置
    pub fn set_boxes(&mut self, boxes: Vec<BBox>) {
        self.boxes = boxes;
    }

    /// 目标丢失: 移除对应框, 全部丢失时回到 Idle
    pub fn lose(&mut self, index: usize) {
        if index < self.boxes.len() {
            let bbox = self.boxes.remove(index);
            self.generation += 1;
            log::warn!("⚠️ 目标 #{} 跟踪丢失: {:?}", index + 1, bbox);
        }
        if self.boxes.is_empty() && matches!(self.mode, Mode::Tracking | Mode::Initializing) {
            self.mode = Mode::Idle;
        }
    }

    /// 当前帧开始时是否需要暂停等待用户操作
    pub fn needs_selection(&self) -> bool {
        matches!(self.mode, Mode::Idle | Mode::Selecting)
    }
}
