use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::device::{Clock, Color, Framebuffer, KeyState, Keypad, Screen, SystemClock};
use crate::error::{LoadError, RunError};
use crate::features::Features;
use crate::isa::{Instr, Register, INSTR_LEN};

mod alu;
mod flags;
mod memory;

pub use flags::Flags;
pub use memory::{Memory, MEMORY_SIZE};

/// Instruction pointers are always 4-byte aligned.
const IP_MASK: u16 = !(INSTR_LEN as u16 - 1);

/// Represents complete processor state during runtime.
#[derive(Clone)]
pub struct RunState {
    /// 16x 16-bit registers, register 0 is the stack pointer
    reg: [u16; 16],
    /// System memory - 64KB in size
    mem: Memory,
    /// Instruction pointer
    ip: u16,
    flags: Flags,
    /// Color used by `PIXEL`
    color: Color,
    /// Clock reading at the last `TIMERST`
    timer_ref: u64,
    cycles: u64,
}

impl RunState {
    fn new(mem: Memory, timer_ref: u64) -> Self {
        RunState {
            reg: [0; 16],
            mem,
            ip: 0,
            flags: Flags::default(),
            color: Color::default(),
            timer_ref,
            cycles: 0,
        }
    }

    #[inline]
    pub fn reg(&self, reg: Register) -> u16 {
        self.reg[reg.index()]
    }

    #[inline]
    pub fn set_reg(&mut self, reg: Register, val: u16) {
        self.reg[reg.index()] = val;
    }

    pub fn registers(&self) -> &[u16; 16] {
        &self.reg
    }

    pub fn ip(&self) -> u16 {
        self.ip
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        self.mem.read_word(addr)
    }

    /// Instructions executed so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Stack grows upwards: bump the pointer, then write at it.
    fn push(&mut self, val: u16) {
        let sp = self.reg(Register::SP).wrapping_add(2);
        self.set_reg(Register::SP, sp);
        self.mem.write_word(sp, val);
    }

    fn pop(&mut self) -> u16 {
        let sp = self.reg(Register::SP);
        let val = self.mem.read_word(sp);
        self.set_reg(Register::SP, sp.wrapping_sub(2));
        val
    }
}

/// Tunables for batched execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunConfig {
    /// Wall-clock time a batch may run before yielding
    pub batch_budget: Duration,
    /// Cycles executed between clock checks
    pub check_interval: u32,
    pub features: Features,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            batch_budget: Duration::from_millis(10),
            check_interval: 100,
            features: Features::default(),
        }
    }
}

/// Outcome of [`RunEnvironment::run_batch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Batch {
    /// Budget used up, call again to continue.
    Yielded { cycles: u64 },
    /// Halt was requested before the batch started. Nothing was executed.
    Halted,
}

/// Shared stop flag. The engine only looks at it between batches.
#[derive(Clone, Default, Debug)]
pub struct HaltHandle(Arc<AtomicBool>);

impl HaltHandle {
    pub fn halt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Processor state wired to the devices it talks to.
pub struct RunEnvironment<S = Framebuffer, K = KeyState, C = SystemClock> {
    state: RunState,
    screen: S,
    keypad: K,
    clock: C,
    rng: StdRng,
    config: RunConfig,
    halt: HaltHandle,
}

impl<S, K, C> RunEnvironment<S, K, C>
where
    S: Screen,
    K: Keypad,
    C: Clock,
{
    /// Load `image` at address 0. Everything else starts zeroed, with the timer reference
    /// taken from `clock`.
    pub fn new(image: &[u8], screen: S, keypad: K, clock: C) -> Result<Self, LoadError> {
        let mem = Memory::load(image)?;
        let timer_ref = clock.now_millis();
        debug!(bytes = image.len(), "loaded image");
        Ok(RunEnvironment {
            state: RunState::new(mem, timer_ref),
            screen,
            keypad,
            clock,
            rng: StdRng::from_entropy(),
            config: RunConfig::default(),
            halt: HaltHandle::default(),
        })
    }

    /// Make `RND` reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    pub fn screen(&self) -> &S {
        &self.screen
    }

    pub fn keypad_mut(&mut self) -> &mut K {
        &mut self.keypad
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cycles(&self) -> u64 {
        self.state.cycles
    }

    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    /// Execute a single instruction.
    pub fn step(&mut self) -> Result<(), RunError> {
        let ip = self.state.ip;
        let instr = Instr::decode(self.state.mem.fetch(ip));
        trace!(ip, ?instr, "execute");
        self.execute(ip, instr)
    }

    /// Execute `n` instructions, ignoring the batch budget and halt flag.
    pub fn run_cycles(&mut self, n: u64) -> Result<(), RunError> {
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    /// Execute instructions until the batch budget is spent, checking the clock every
    /// `check_interval` cycles. A halt is only noticed before the batch begins.
    pub fn run_batch(&mut self) -> Result<Batch, RunError> {
        if self.halt.is_halted() {
            debug!(cycles = self.state.cycles, "halted");
            return Ok(Batch::Halted);
        }

        let start = self.state.cycles;
        let budget = self.config.batch_budget.as_millis() as u64;
        let deadline = self.clock.now_millis().saturating_add(budget);
        loop {
            for _ in 0..self.config.check_interval.max(1) {
                self.step()?;
            }
            if self.clock.now_millis() >= deadline {
                break;
            }
        }

        let cycles = self.state.cycles - start;
        trace!(cycles, ip = self.state.ip, "batch yielded");
        Ok(Batch::Yielded { cycles })
    }

    fn execute(&mut self, ip: u16, instr: Instr) -> Result<(), RunError> {
        let state = &mut self.state;
        let mut next = ip.wrapping_add(INSTR_LEN as u16);
        let mut flags = Flags::default();

        match instr {
            Instr::Nop => {}
            Instr::Input { dest, id } => {
                let active = self.keypad.is_input_active(state.reg(id));
                state.set_reg(dest, active as u16);
            }
            Instr::Call { addr } => {
                state.push(ip);
                next = addr;
            }
            Instr::Ret { pop } => {
                next = state
                    .pop()
                    .wrapping_add(pop as u16)
                    .wrapping_add(INSTR_LEN as u16);
            }
            Instr::Load { dest, addr } => {
                let val = state.mem.read_word(state.reg(addr));
                state.set_reg(dest, val);
            }
            Instr::LoadImm { dest, addr } => {
                let val = state.mem.read_word(addr);
                state.set_reg(dest, val);
            }
            Instr::Mov { dest, src } => state.set_reg(dest, state.reg(src)),
            Instr::MovImm { dest, value } => state.set_reg(dest, value),
            Instr::Push { src } => state.push(state.reg(src)),
            Instr::Pop { dest } => {
                let val = state.pop();
                state.set_reg(dest, val);
            }
            Instr::Alu { op, dest, src } => {
                let (d, s) = (state.reg(dest), state.reg(src));
                let result = alu::compute(op, d, s);
                if op.writes_back() {
                    state.set_reg(dest, result as u16);
                }
                flags = Flags::from_result(op, d, s, result);
            }
            Instr::Color { src } => state.color = Color(state.reg(src) as u8),
            Instr::Pixel { x, y } => self.screen.set_pixel(state.reg(x), state.reg(y), state.color),
            Instr::Stor { src, addr } => {
                let (addr, val) = (state.reg(addr), state.reg(src));
                state.mem.write_word(addr, val);
            }
            Instr::StorImm { src, addr } => state.mem.write_word(addr, state.reg(src)),
            Instr::Time { dest } => {
                let elapsed = self.clock.now_millis().wrapping_sub(state.timer_ref);
                state.set_reg(dest, elapsed as u16);
            }
            Instr::TimerRst => state.timer_ref = self.clock.now_millis(),
            Instr::Rnd { dest } => state.set_reg(dest, self.rng.gen()),
            Instr::Jmp { target } => next = state.reg(target),
            Instr::JmpImm { addr } => next = addr,
            Instr::Jump { cond, addr } => {
                if state.flags.satisfies(cond) {
                    next = addr;
                }
            }
            Instr::Unknown(opcode) => {
                if self.config.features.strict() {
                    warn!(opcode, addr = ip, "unknown opcode");
                    self.halt.halt();
                    return Err(RunError::UnknownOpcode { opcode, addr: ip });
                }
            }
        }

        state.ip = next & IP_MASK;
        state.flags = flags;
        state.cycles += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ManualClock;
    use crate::isa::Cond;

    type TestEnv = RunEnvironment<Framebuffer, KeyState, ManualClock>;

    fn load(image: &[u8], clock: ManualClock) -> TestEnv {
        RunEnvironment::new(image, Framebuffer::new(), KeyState::new(), clock)
            .unwrap()
            .with_seed(7)
    }

    fn env(src: &str) -> TestEnv {
        load(&crate::assemble(src).unwrap(), ManualClock::new(0))
    }

    fn run(src: &str, cycles: u64) -> TestEnv {
        let mut env = env(src);
        env.run_cycles(cycles).unwrap();
        env
    }

    #[test]
    fn add_without_flags() {
        let env = run("MOVI A 0x1\nMOVI B 0x1\nADD A B", 3);
        assert_eq!(env.state().reg(Register::R2), 2);
        assert_eq!(env.state().flags(), Flags::default());
        assert_eq!(env.state().ip(), 12);
    }

    #[test]
    fn add_with_carry() {
        let env = run("MOVI A 0xFFFF\nMOVI B 0xFFFF\nADD A B", 3);
        assert_eq!(env.state().reg(Register::R2), 0xFFFE);
        assert_eq!(
            env.state().flags(),
            Flags { overflow: false, carry: true, zero: false, sign: true }
        );
    }

    #[test]
    fn compare_keeps_registers() {
        let env = run("MOVI A 0x5\nMOVI B 0x5\nCMP A B", 3);
        assert_eq!(env.state().reg(Register::R2), 5);
        assert!(env.state().flags().zero);
    }

    #[test]
    fn flags_cleared_by_other_instructions() {
        let env = run("MOVI A 0x5\nCMP A A\nNOP", 3);
        assert_eq!(env.state().flags(), Flags::default());
    }

    #[test]
    fn push_pop_round_trip() {
        let src = r#"
            MOVI SP 0x0100
        loop:
            PUSH A
            POP B
            JMPI loop
        "#;
        let mut env = env(src);
        env.step().unwrap();
        for val in 0..=u16::MAX {
            env.state_mut().set_reg(Register::R2, val);
            env.step().unwrap();
            assert_eq!(env.state().reg(Register::SP), 0x0102);
            assert_eq!(env.state().read_word(0x0102), val);
            env.run_cycles(2).unwrap();
            assert_eq!(env.state().reg(Register::R3), val);
            assert_eq!(env.state().reg(Register::SP), 0x0100);
            assert_eq!(env.state().ip(), 4);
        }
    }

    #[test]
    fn call_and_return() {
        let src = r#"
            MOVI SP 0x0100
            CALL sub
            MOVI A 0x1
            MOVI B 0x1
        end:
            JMPI end
        sub:
            RET 0x04
        "#;
        let mut env = env(src);
        env.run_cycles(2).unwrap();
        assert_eq!(env.state().ip(), 20);
        assert_eq!(env.state().read_word(0x0102), 4);
        env.run_cycles(3).unwrap();
        // Return address 4, plus 4 skipped bytes, plus 4
        assert_eq!(env.state().reg(Register::R2), 0);
        assert_eq!(env.state().reg(Register::R3), 1);
        assert_eq!(env.state().reg(Register::SP), 0x0100);
        assert_eq!(env.state().ip(), 16);
    }

    #[test]
    fn return_lands_aligned() {
        // Return address 0, plus 2, plus 4
        let env = run("CALL sub\nNOP\nsub:\nRET 0x02", 2);
        assert_eq!(env.state().ip(), 4);
    }

    #[test]
    fn jumps_are_aligned() {
        assert_eq!(run("JMPI 0x0006", 1).state().ip(), 4);
        assert_eq!(run("MOVI A 0x000B\nJMP A", 2).state().ip(), 8);
    }

    #[test]
    fn conditional_jumps() {
        let src = r#"
            MOVI A 0x1
            MOVI B 0x2
            CMP A B
            JL less
            MOVI C 0x1
        less:
            CMP A A
            JNE less
            MOVI D 0x1
        "#;
        let env = run(src, 7);
        assert_eq!(env.state().reg(Register::R4), 0);
        assert_eq!(env.state().reg(Register::R5), 1);
    }

    #[test]
    fn jump_opcodes_follow_flags() {
        #[rustfmt::skip]
        let jumps = [
            ("JEQ", Cond::Eq), ("JNE", Cond::Ne), ("JG", Cond::G), ("JGE", Cond::Ge),
            ("JA", Cond::A), ("JAE", Cond::Ae), ("JL", Cond::L), ("JLE", Cond::Le),
            ("JB", Cond::B), ("JBE", Cond::Be), ("JO", Cond::O), ("JNO", Cond::No),
            ("JS", Cond::S), ("JNS", Cond::Ns),
        ];
        assert_eq!(jumps.map(|(_, cond)| cond), Cond::ALL);

        // (op, dest, src, overflow, carry, zero, sign)
        #[rustfmt::skip]
        let cases = [
            ("ADD", 0x0001, 0x0001, false, false, false, false),
            ("ADD", 0xFFFF, 0xFFFF, false, true,  false, true),
            ("ADD", 0x7FFF, 0x0001, true,  false, false, true),
            ("ADD", 0x8000, 0x8000, true,  true,  true,  false),
            ("CMP", 0x0005, 0x0005, false, false, true,  false),
            ("CMP", 0x0001, 0x0002, false, true,  false, true),
            ("CMP", 0x8000, 0x0001, true,  false, false, false),
            ("SUB", 0x7FFF, 0xFFFF, true,  true,  false, true),
        ];

        for (op, dest, src, o, c, z, s) in cases {
            for (jump, cond) in jumps {
                let taken = match cond {
                    Cond::Eq => z,
                    Cond::Ne => !z,
                    Cond::G => !z && s == o,
                    Cond::Ge => s == o,
                    Cond::A => !c && !z,
                    Cond::Ae => !c,
                    Cond::L => s != o,
                    Cond::Le => s != o || z,
                    Cond::B => c,
                    Cond::Be => c || z,
                    Cond::O => o,
                    Cond::No => !o,
                    Cond::S => s,
                    Cond::Ns => !s,
                };
                let program = format!(
                    "MOVI A 0x{dest:04x}\nMOVI B 0x{src:04x}\n{op} A B\n{jump} taken\nNOP\ntaken:\nNOP"
                );
                let env = run(&program, 4);
                let expected = if taken { 20 } else { 16 };
                assert_eq!(
                    env.state().ip(),
                    expected,
                    "{jump} after {op} 0x{dest:04x} 0x{src:04x}"
                );
            }
        }
    }

    #[test]
    fn memory_transfers() {
        let src = "MOVI A 0xBEEF\nMOVI B 0x0200\nSTOR A B\nLOADI C 0x0200\nSTORI A 0xFFFF\nLOAD D B";
        let env = run(src, 6);
        assert_eq!(env.state().memory().read_byte(0x0200), 0xBE);
        assert_eq!(env.state().reg(Register::R4), 0xBEEF);
        assert_eq!(env.state().reg(Register::R5), 0xBEEF);
        // Word at the top of memory wraps to address 0
        assert_eq!(env.state().memory().read_byte(0xFFFF), 0xBE);
        assert_eq!(env.state().memory().read_byte(0x0000), 0xEF);
    }

    #[test]
    fn divide_by_zero() {
        let env = run("MOVI A 0x10\nDIV A B", 2);
        assert_eq!(env.state().reg(Register::R2), 0xFFFF);
        assert!(env.state().flags().sign);
        assert!(!env.state().flags().carry);
    }

    #[test]
    fn unknown_opcode_is_nop() {
        #[rustfmt::skip]
        let image = [
            0x07, 0x02, 0xFF, 0xFF, // MOVI A 0xFFFF
            0x0a, 0x02, 0x02, 0x00, // ADD A A
            0x20, 0x01, 0x02, 0x03,
        ];
        let mut env = load(&image, ManualClock::new(0));
        env.run_cycles(3).unwrap();
        assert_eq!(env.state().ip(), 12);
        assert_eq!(env.state().flags(), Flags::default());
        assert_eq!(env.state().reg(Register::R2), 0xFFFE);
    }

    #[test]
    fn unknown_opcode_faults_when_strict() {
        let image = [0x00, 0, 0, 0, 0x20, 0, 0, 0];
        let config = RunConfig {
            features: "strict".parse().unwrap(),
            ..RunConfig::default()
        };
        let mut env = load(&image, ManualClock::new(0)).with_config(config);
        assert!(env.config().features.strict());
        env.step().unwrap();
        assert_eq!(
            env.step(),
            Err(RunError::UnknownOpcode { opcode: 0x20, addr: 4 })
        );
        assert_eq!(env.state().ip(), 4);
        assert!(env.halt_handle().is_halted());
        assert_eq!(env.run_batch(), Ok(Batch::Halted));
    }

    #[test]
    fn color_and_pixel() {
        let src = "MOVI A 0x01FC\nCOLOR A\nMOVI B 0x5\nMOVI C 0x6\nPIXEL B C\nMOVI B 0x0300\nPIXEL B C";
        let env = run(src, 7);
        assert_eq!(env.state().color(), Color(0xFC));
        assert_eq!(env.screen().pixel(5, 6), Some(Color(0xFC)));
        assert_eq!(env.screen().pixel(0, 0), Some(Color(0)));
        assert_eq!(env.screen().writes(), 2);
    }

    #[test]
    fn input_state() {
        let mut env = env("MOVI B 0x3\nINPUT A B\nMOVI C 0x4\nINPUT D C");
        env.keypad_mut().set(3, true);
        env.run_cycles(4).unwrap();
        assert_eq!(env.state().reg(Register::R2), 1);
        assert_eq!(env.state().reg(Register::R5), 0);
    }

    #[test]
    fn timer() {
        let mut env = env("TIME A\nTIMERST\nTIME B\nTIME C");
        env.clock().advance(25);
        env.step().unwrap();
        assert_eq!(env.state().reg(Register::R2), 25);
        env.step().unwrap();
        env.clock().advance(5);
        env.step().unwrap();
        assert_eq!(env.state().reg(Register::R3), 5);
        env.clock().advance(70_000);
        env.step().unwrap();
        assert_eq!(env.state().reg(Register::R4), (70_005u64 & 0xFFFF) as u16);
    }

    #[test]
    fn timer_reset_uses_current_time() {
        let clock = ManualClock::new(1_000);
        let mut env = load(&crate::assemble("TIMERST
TIME A").unwrap(), clock);
        env.clock().set(5_000);
        env.step().unwrap();
        env.clock().set(5_040);
        env.step().unwrap();
        assert_eq!(env.state().reg(Register::R2), 40);
    }

    #[test]
    fn seeded_random() {
        let a = run("RND A\nRND B", 2);
        let b = run("RND A\nRND B", 2);
        assert_eq!(a.state().registers(), b.state().registers());
    }

    #[test]
    fn batches_yield_on_budget() {
        let mut env = load(&[], ManualClock::ticking(1));
        assert_eq!(env.run_batch(), Ok(Batch::Yielded { cycles: 1000 }));
        assert_eq!(env.run_batch(), Ok(Batch::Yielded { cycles: 1000 }));
        assert_eq!(env.cycles(), 2000);

        let handle = env.halt_handle();
        handle.halt();
        assert_eq!(env.run_batch(), Ok(Batch::Halted));
        assert_eq!(env.cycles(), 2000);
    }

    #[test]
    fn batch_runs_at_least_one_interval() {
        let config = RunConfig {
            batch_budget: Duration::ZERO,
            check_interval: 10,
            ..RunConfig::default()
        };
        let mut env = load(&[], ManualClock::new(0)).with_config(config);
        assert_eq!(env.run_batch(), Ok(Batch::Yielded { cycles: 10 }));
        // Execution wraps around the address space
        env.run_cycles(MEMORY_SIZE as u64 / 4 - 10).unwrap();
        assert_eq!(env.state().ip(), 0);
    }
}
