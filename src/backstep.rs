// Bounded undo log for the simulator. Every observable state mutation
// pushes the inverse operation; stepping back pops and applies inverses,
// collapsing all records produced by one statement into a single logical
// reversal. The buffer is circular with preallocated records, so the hot
// loop never allocates once warmed up.

pub const BACKSTEP_CAPACITY: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub enum BackStepAction {
    MemoryWord { address: u32, previous: i32 },
    MemoryHalf { address: u32, previous: i32 },
    MemoryByte { address: u32, previous: i32 },
    Register { number: u32, previous: i32 },
    HiRegister { previous: i32 },
    LoRegister { previous: i32 },
    Cop0Register { number: u32, previous: i32 },
    Cop1Register { number: u32, previous: u32 },
    Cop1ConditionSet { flag: u32 },
    Cop1ConditionClear { flag: u32 },
    DoNothing,
}

#[derive(Debug, Clone)]
pub struct BackStep {
    pub action: BackStepAction,
    /// Address of the statement that caused the mutation, used to collapse
    /// multi-effect instructions into one undo step.
    pub statement: u32,
    pub pc: u32,
    pub in_delay_slot: bool,
}

pub struct BackStepper {
    buffer: Vec<BackStep>,
    top: isize,
    size: usize,
    pub engaged: bool,
    in_reversal: bool,
}

impl BackStepper {
    pub fn new(engaged: bool) -> Self {
        BackStepper {
            buffer: Vec::with_capacity(BACKSTEP_CAPACITY),
            top: -1,
            size: 0,
            engaged,
            in_reversal: false,
        }
    }

    pub fn reset(&mut self) {
        self.top = -1;
        self.size = 0;
        self.in_reversal = false;
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn recording(&self) -> bool {
        self.engaged && !self.in_reversal
    }

    pub fn push(&mut self, action: BackStepAction, statement: u32, pc: u32, in_delay_slot: bool) {
        if !self.recording() {
            return;
        }
        self.top = ((self.top + 1) as usize % BACKSTEP_CAPACITY) as isize;
        let record = BackStep { action, statement, pc, in_delay_slot };
        if (self.top as usize) < self.buffer.len() {
            self.buffer[self.top as usize] = record;
        } else {
            self.buffer.push(record);
        }
        if self.size < BACKSTEP_CAPACITY {
            self.size += 1;
        }
    }

    fn pop(&mut self) -> Option<BackStep> {
        if self.size == 0 {
            return None;
        }
        let record = self.buffer[self.top as usize].clone();
        self.top = if self.top == 0 { BACKSTEP_CAPACITY as isize - 1 } else { self.top - 1 };
        self.size -= 1;
        Some(record)
    }

    fn peek_statement(&self) -> Option<u32> {
        if self.size == 0 {
            None
        } else {
            Some(self.buffer[self.top as usize].statement)
        }
    }

    /// Pop every record belonging to the statement currently on top.
    /// Recording is suppressed while the caller applies the inverses.
    pub fn take_step(&mut self) -> Vec<BackStep> {
        let mut records = Vec::new();
        let target = match self.peek_statement() {
            Some(s) => s,
            None => return records,
        };
        self.in_reversal = true;
        while self.peek_statement() == Some(target) {
            match self.pop() {
                Some(r) => records.push(r),
                None => break,
            }
        }
        self.in_reversal = false;
        records
    }
}
